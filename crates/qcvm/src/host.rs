//! Host-facing accessors: parameter and return marshalling, globals, entity
//! fields, strings and name lookups.
//!
//! Name lookups are linear scans over the definition tables. Resolve names
//! once during setup and keep the indices.

use std::borrow::Cow;

use qcvm_image::format::{parm_offset, MAX_PARMS, OFS_RETURN};
use qcvm_image::{Def, DefType, Function, Slot};

use crate::error::{VmError, VmResult};
use crate::strings;
use crate::vm::Vm;

/// A function named either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRef<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for FunctionRef<'a> {
    fn from(name: &'a str) -> Self {
        FunctionRef::Name(name)
    }
}

impl<'a> From<&'a String> for FunctionRef<'a> {
    fn from(name: &'a String) -> Self {
        FunctionRef::Name(name)
    }
}

impl From<usize> for FunctionRef<'_> {
    fn from(index: usize) -> Self {
        FunctionRef::Index(index)
    }
}

fn parm(i: usize) -> VmResult<usize> {
    if i < MAX_PARMS {
        Ok(parm_offset(i))
    } else {
        Err(VmError::ArgumentOutOfRange(i))
    }
}

impl Vm {
    // ── Lookups ──────────────────────────────────────────────────────────────

    pub(crate) fn resolve_function(&self, function: FunctionRef<'_>) -> VmResult<usize> {
        match function {
            FunctionRef::Name(name) => self
                .find_function(name)
                .ok_or_else(|| VmError::FunctionNotFound(name.to_string())),
            FunctionRef::Index(i) if i >= 1 && i < self.image.functions.len() => Ok(i),
            FunctionRef::Index(i) => Err(VmError::FunctionNotFound(format!("#{i}"))),
        }
    }

    /// Index of the function called `name`.
    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.image
            .functions
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, f)| self.image.string(f.name) == name.as_bytes())
            .map(|(i, _)| i)
    }

    fn find_def<'d>(&self, defs: &'d [Def], name: &str) -> Option<&'d Def> {
        defs.iter()
            .skip(1)
            .find(|d| self.image.string(d.name) == name.as_bytes())
    }

    /// Global slot of the global called `name`.
    pub fn find_global(&self, name: &str) -> Option<usize> {
        self.find_def(&self.image.global_defs, name)
            .map(|d| usize::from(d.offset))
    }

    /// Like [`Vm::find_global`], but only matches globals of type `ty`.
    pub fn find_global_typed(&self, name: &str, ty: DefType) -> Option<usize> {
        self.image
            .global_defs
            .iter()
            .skip(1)
            .find(|d| d.def_type() == Some(ty) && self.image.string(d.name) == name.as_bytes())
            .map(|d| usize::from(d.offset))
    }

    /// Entity word offset of the field called `name`.
    pub fn find_field(&self, name: &str) -> Option<i32> {
        self.find_def(&self.image.field_defs, name)
            .map(|d| i32::from(d.offset))
    }

    /// The entity currently held by the entity-typed global `name`.
    ///
    /// This is the global's value, not its slot; use
    /// [`Vm::find_global_typed`] with [`DefType::Entity`] for the slot.
    pub fn find_global_entity(&self, name: &str) -> Option<i32> {
        let ofs = self.find_global_typed(name, DefType::Entity)?;
        self.globals.int(ofs).ok()
    }

    pub fn functions(&self) -> impl Iterator<Item = (usize, Cow<'_, str>, &Function)> {
        self.image
            .functions
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, f)| (i, self.image.string_lossy(f.name), f))
    }

    pub fn global_defs(&self) -> impl Iterator<Item = (Cow<'_, str>, &Def)> {
        self.image
            .global_defs
            .iter()
            .skip(1)
            .map(|d| (self.image.string_lossy(d.name), d))
    }

    pub fn field_defs(&self) -> impl Iterator<Item = (Cow<'_, str>, &Def)> {
        self.image
            .field_defs
            .iter()
            .skip(1)
            .map(|d| (self.image.string_lossy(d.name), d))
    }

    // ── Parameters ───────────────────────────────────────────────────────────

    /// Arguments passed to the most recent call.
    pub fn argc(&self) -> usize {
        self.argc
    }

    pub fn set_parm_float(&mut self, i: usize, f: f32) -> VmResult<()> {
        self.globals.set_float(parm(i)?, f)
    }

    pub fn set_parm_vector(&mut self, i: usize, v: [f32; 3]) -> VmResult<()> {
        self.globals.set_vector(parm(i)?, v)
    }

    pub fn set_parm_int(&mut self, i: usize, n: i32) -> VmResult<()> {
        self.globals.set_int(parm(i)?, n)
    }

    pub fn set_parm_entity(&mut self, i: usize, entity: i32) -> VmResult<()> {
        self.globals.set_int(parm(i)?, entity)
    }

    pub fn set_parm_function(&mut self, i: usize, function: i32) -> VmResult<()> {
        self.globals.set_int(parm(i)?, function)
    }

    /// Copy `s` into tempstrings and pass it as parameter `i`.
    pub fn set_parm_string(&mut self, i: usize, s: &str) -> VmResult<()> {
        let slot = parm(i)?;
        let ofs = self.temp.alloc(s.as_bytes())?;
        self.globals.set_int(slot, ofs)
    }

    pub fn get_parm_float(&self, i: usize) -> VmResult<f32> {
        self.globals.float(parm(i)?)
    }

    pub fn get_parm_vector(&self, i: usize) -> VmResult<[f32; 3]> {
        self.globals.vector(parm(i)?)
    }

    pub fn get_parm_int(&self, i: usize) -> VmResult<i32> {
        self.globals.int(parm(i)?)
    }

    pub fn get_parm_entity(&self, i: usize) -> VmResult<i32> {
        self.globals.int(parm(i)?)
    }

    pub fn get_parm_function(&self, i: usize) -> VmResult<i32> {
        self.globals.int(parm(i)?)
    }

    pub fn get_parm_string(&self, i: usize) -> VmResult<Cow<'_, str>> {
        let ofs = self.globals.int(parm(i)?)?;
        Ok(self.string(ofs))
    }

    // ── Return value ─────────────────────────────────────────────────────────

    fn set_return(&mut self, value: [Slot; 3]) -> VmResult<()> {
        self.globals.write(OFS_RETURN, &value)
    }

    pub fn return_float(&mut self, f: f32) -> VmResult<()> {
        self.set_return([Slot::from_float(f), Slot::ZERO, Slot::ZERO])
    }

    pub fn return_vector(&mut self, v: [f32; 3]) -> VmResult<()> {
        self.set_return(v.map(Slot::from_float))
    }

    pub fn return_int(&mut self, n: i32) -> VmResult<()> {
        self.set_return([Slot::from_int(n), Slot::ZERO, Slot::ZERO])
    }

    pub fn return_entity(&mut self, entity: i32) -> VmResult<()> {
        self.return_int(entity)
    }

    pub fn return_function(&mut self, function: i32) -> VmResult<()> {
        self.return_int(function)
    }

    pub fn return_string(&mut self, s: &str) -> VmResult<()> {
        let ofs = self.temp.alloc(s.as_bytes())?;
        self.return_int(ofs)
    }

    pub fn get_return_float(&self) -> VmResult<f32> {
        self.globals.float(OFS_RETURN)
    }

    pub fn get_return_vector(&self) -> VmResult<[f32; 3]> {
        self.globals.vector(OFS_RETURN)
    }

    pub fn get_return_int(&self) -> VmResult<i32> {
        self.globals.int(OFS_RETURN)
    }

    pub fn get_return_entity(&self) -> VmResult<i32> {
        self.globals.int(OFS_RETURN)
    }

    pub fn get_return_string(&self) -> VmResult<Cow<'_, str>> {
        let ofs = self.globals.int(OFS_RETURN)?;
        Ok(self.string(ofs))
    }

    // ── Globals ──────────────────────────────────────────────────────────────

    fn global_slot(&self, ofs: usize, width: usize) -> VmResult<usize> {
        if self.globals.contains(ofs, width) {
            Ok(ofs)
        } else {
            Err(VmError::GlobalOutOfRange(ofs))
        }
    }

    pub fn global(&self, ofs: usize) -> VmResult<Slot> {
        self.globals.get(self.global_slot(ofs, 1)?)
    }

    pub fn set_global(&mut self, ofs: usize, value: Slot) -> VmResult<()> {
        let ofs = self.global_slot(ofs, 1)?;
        self.globals.set(ofs, value)
    }

    pub fn global_float(&self, ofs: usize) -> VmResult<f32> {
        self.global(ofs).map(Slot::as_float)
    }

    pub fn set_global_float(&mut self, ofs: usize, f: f32) -> VmResult<()> {
        self.set_global(ofs, Slot::from_float(f))
    }

    pub fn global_vector(&self, ofs: usize) -> VmResult<[f32; 3]> {
        self.globals.vector(self.global_slot(ofs, 3)?)
    }

    pub fn set_global_vector(&mut self, ofs: usize, v: [f32; 3]) -> VmResult<()> {
        let ofs = self.global_slot(ofs, 3)?;
        self.globals.set_vector(ofs, v)
    }

    pub fn global_string(&self, ofs: usize) -> VmResult<Cow<'_, str>> {
        let value = self.global(ofs)?;
        Ok(self.string(value.as_string()))
    }

    // ── Entity fields ────────────────────────────────────────────────────────

    pub fn field(&self, entity: i32, field: i32) -> VmResult<Slot> {
        let word = self.entities.field_word(entity, field, 1)?;
        Ok(self.entities.read(word, 1)[0])
    }

    pub fn set_field(&mut self, entity: i32, field: i32, value: Slot) -> VmResult<()> {
        let word = self.entities.field_word(entity, field, 1)?;
        self.entities.write(word, &[value]);
        Ok(())
    }

    pub fn field_float(&self, entity: i32, field: i32) -> VmResult<f32> {
        self.field(entity, field).map(Slot::as_float)
    }

    pub fn set_field_float(&mut self, entity: i32, field: i32, f: f32) -> VmResult<()> {
        self.set_field(entity, field, Slot::from_float(f))
    }

    pub fn field_vector(&self, entity: i32, field: i32) -> VmResult<[f32; 3]> {
        let word = self.entities.field_word(entity, field, 3)?;
        let w = self.entities.read(word, 3);
        Ok([w[0].as_float(), w[1].as_float(), w[2].as_float()])
    }

    pub fn set_field_vector(&mut self, entity: i32, field: i32, v: [f32; 3]) -> VmResult<()> {
        let word = self.entities.field_word(entity, field, 3)?;
        self.entities.write(word, &v.map(Slot::from_float));
        Ok(())
    }

    /// Zero all fields of `entity`.
    pub fn clear_entity(&mut self, entity: i32) -> VmResult<()> {
        self.entities.clear(entity)
    }

    // ── Strings ──────────────────────────────────────────────────────────────

    /// Resolve a string offset (static or tempstring).
    pub fn string(&self, offset: i32) -> Cow<'_, str> {
        String::from_utf8_lossy(strings::resolve(&self.image, &self.temp, offset))
    }

    /// Copy `s` into tempstrings; returns its string offset.
    pub fn alloc_string(&mut self, s: &str) -> VmResult<i32> {
        self.temp.alloc(s.as_bytes())
    }
}
