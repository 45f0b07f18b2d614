//! Programmatic image assembly.
//!
//! Lays tables out the way the QuakeC compiler does: a null statement, a
//! null function and a null definition at index 0, the empty string at
//! offset 0, and the 28 reserved globals ahead of program data. Everything
//! allocated while a function is open belongs to that function's local
//! window.
//!
//! ```text
//! let mut b = ImageBuilder::new();
//! let (main, _) = b.function("main", &[]);
//! let two = b.float(2.0);
//! b.emit(Opcode::Return, two, 0, 0);
//! b.end_function();
//! let bytes = b.build();
//! ```

use std::collections::HashMap;

use crate::format::*;
use crate::opcode::Opcode;
use crate::slot::Slot;

/// A field as the compiler emits it: a word offset inside every entity plus
/// a global of type field that holds that offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub offset: u16,
    pub global: u16,
}

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    version: u32,
    crc: u32,
    statements: Vec<Statement>,
    functions: Vec<Function>,
    global_defs: Vec<Def>,
    field_defs: Vec<Def>,
    strings: Vec<u8>,
    interned: HashMap<String, i32>,
    globals: Vec<Slot>,
    entity_fields: u32,
    open: Option<usize>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        let mut interned = HashMap::new();
        interned.insert(String::new(), 0);
        Self {
            version: VERSION_STANDARD,
            crc: 0,
            statements: vec![Statement::default()],
            functions: vec![Function::default()],
            global_defs: vec![Def::default()],
            field_defs: vec![Def::default()],
            strings: vec![0],
            interned,
            globals: vec![Slot::ZERO; OFS_RESERVED],
            entity_fields: 0,
            open: None,
        }
    }

    /// Override the header version tag.
    pub fn set_version(&mut self, version: u32) -> &mut Self {
        self.version = version;
        self
    }

    pub fn set_crc(&mut self, crc: u32) -> &mut Self {
        self.crc = crc;
        self
    }

    // ── Strings ──────────────────────────────────────────────────────────────

    /// Intern a static string and return its offset.
    pub fn string(&mut self, s: &str) -> i32 {
        if let Some(&ofs) = self.interned.get(s) {
            return ofs;
        }
        let ofs = self.strings.len() as i32;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        self.interned.insert(s.to_string(), ofs);
        ofs
    }

    // ── Globals ──────────────────────────────────────────────────────────────

    /// Allocate one global slot with an initial value.
    pub fn global(&mut self, value: Slot) -> u16 {
        let ofs = self.globals.len();
        self.globals.push(value);
        ofs as u16
    }

    /// Allocate three consecutive slots.
    pub fn global_vector(&mut self, v: [f32; 3]) -> u16 {
        let ofs = self.global(Slot::from_float(v[0]));
        self.global(Slot::from_float(v[1]));
        self.global(Slot::from_float(v[2]));
        ofs
    }

    pub fn float(&mut self, f: f32) -> u16 {
        self.global(Slot::from_float(f))
    }

    pub fn int(&mut self, i: i32) -> u16 {
        self.global(Slot::from_int(i))
    }

    /// A global holding the offset of an interned string.
    pub fn string_constant(&mut self, s: &str) -> u16 {
        let ofs = self.string(s);
        self.global(Slot::from_int(ofs))
    }

    /// A global holding a function index.
    pub fn function_constant(&mut self, function: i32) -> u16 {
        self.global(Slot::from_int(function))
    }

    /// Allocate a named global and its definition.
    pub fn named_global(&mut self, name: &str, ty: DefType, init: &[Slot]) -> u16 {
        let ofs = self.globals.len() as u16;
        for i in 0..ty.width() {
            self.global(init.get(i).copied().unwrap_or_default());
        }
        let name = self.string(name);
        self.global_defs.push(Def {
            type_tag: ty.tag(),
            offset: ofs,
            name,
        });
        ofs
    }

    /// Add a global definition for an already allocated slot.
    pub fn global_def(&mut self, name: &str, type_tag: u16, offset: u16) {
        let name = self.string(name);
        self.global_defs.push(Def {
            type_tag,
            offset,
            name,
        });
    }

    // ── Entity fields ────────────────────────────────────────────────────────

    /// Declare an entity field, growing every entity by its width.
    pub fn field(&mut self, name: &str, ty: DefType) -> FieldRef {
        let offset = self.entity_fields as u16;
        self.entity_fields += ty.width() as u32;
        let name_ofs = self.string(name);
        self.field_defs.push(Def {
            type_tag: ty.tag(),
            offset,
            name: name_ofs,
        });
        let global = self.named_global(name, DefType::Field, &[Slot::from_int(offset as i32)]);
        FieldRef { offset, global }
    }

    // ── Functions ────────────────────────────────────────────────────────────

    /// Open a bytecode function. Returns its index and the first slot of each
    /// parameter.
    ///
    /// Panics if another function is still open.
    pub fn function(&mut self, name: &str, parm_widths: &[u8]) -> (i32, Vec<u16>) {
        assert!(self.open.is_none(), "function already open");
        assert!(parm_widths.len() <= MAX_PARMS, "too many parameters");

        let name = self.string(name);
        let first_parm = self.globals.len() as i32;
        let mut parm_sizes = [0u8; MAX_PARMS];
        let mut slots = Vec::with_capacity(parm_widths.len());
        for (i, &width) in parm_widths.iter().enumerate() {
            parm_sizes[i] = width;
            slots.push(self.globals.len() as u16);
            for _ in 0..width {
                self.global(Slot::ZERO);
            }
        }

        let index = self.functions.len();
        self.functions.push(Function {
            first_statement: self.statements.len() as i32,
            first_parm,
            num_locals: 0,
            profile: 0,
            name,
            file: 0,
            num_parms: parm_widths.len() as i32,
            parm_sizes,
        });
        self.open = Some(index);
        (index as i32, slots)
    }

    /// Allocate a zeroed local in the open function.
    pub fn local(&mut self) -> u16 {
        self.global(Slot::ZERO)
    }

    pub fn local_vector(&mut self) -> u16 {
        self.global_vector([0.0; 3])
    }

    /// Close the open function; its window spans everything allocated since
    /// it was opened.
    pub fn end_function(&mut self) -> &mut Self {
        if let Some(index) = self.open.take() {
            let f = &mut self.functions[index];
            f.num_locals = self.globals.len() as i32 - f.first_parm;
        }
        self
    }

    /// Declare a builtin to be resolved by name at its first call.
    pub fn builtin(&mut self, name: &str, parm_widths: &[u8]) -> i32 {
        self.native(name, 0, parm_widths)
    }

    /// Declare a builtin bound to a fixed host table index.
    pub fn builtin_at(&mut self, name: &str, index: usize, parm_widths: &[u8]) -> i32 {
        self.native(name, -(index as i32) - 1, parm_widths)
    }

    fn native(&mut self, name: &str, marker: i32, parm_widths: &[u8]) -> i32 {
        let name = self.string(name);
        let mut parm_sizes = [0u8; MAX_PARMS];
        for (i, &w) in parm_widths.iter().take(MAX_PARMS).enumerate() {
            parm_sizes[i] = w;
        }
        let index = self.functions.len();
        self.functions.push(Function {
            first_statement: marker,
            name,
            num_parms: parm_widths.len().min(MAX_PARMS) as i32,
            parm_sizes,
            ..Function::default()
        });
        index as i32
    }

    // ── Statements ───────────────────────────────────────────────────────────

    /// Append a statement; returns its index.
    pub fn emit(&mut self, op: Opcode, a: u16, b: u16, c: u16) -> usize {
        self.emit_raw(op as u16, a as i16, b as i16, c as i16)
    }

    /// Append a statement with arbitrary operands (branch displacements,
    /// opcodes outside the baseline set).
    pub fn emit_raw(&mut self, opcode: u16, a: i16, b: i16, c: i16) -> usize {
        self.statements.push(Statement { opcode, a, b, c });
        self.statements.len() - 1
    }

    /// Index the next emitted statement will get.
    pub fn next_statement(&self) -> usize {
        self.statements.len()
    }

    /// Rewrite the displacement of a previously emitted branch.
    pub fn patch_branch(&mut self, at: usize, target: usize) {
        let displacement = target as i32 - at as i32;
        let st = &mut self.statements[at];
        if st.opcode == Opcode::Goto as u16 {
            st.a = displacement as i16;
        } else {
            st.b = displacement as i16;
        }
    }

    // ── Output ───────────────────────────────────────────────────────────────

    /// Serialize to a little-endian version-6 image.
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE];

        let ofs_statements = out.len() as u32;
        for s in &self.statements {
            out.extend_from_slice(&s.opcode.to_le_bytes());
            out.extend_from_slice(&s.a.to_le_bytes());
            out.extend_from_slice(&s.b.to_le_bytes());
            out.extend_from_slice(&s.c.to_le_bytes());
        }

        let ofs_global_defs = out.len() as u32;
        write_defs(&mut out, &self.global_defs);
        let ofs_field_defs = out.len() as u32;
        write_defs(&mut out, &self.field_defs);

        let ofs_functions = out.len() as u32;
        for f in &self.functions {
            for word in [
                f.first_statement,
                f.first_parm,
                f.num_locals,
                f.profile,
                f.name,
                f.file,
                f.num_parms,
            ] {
                out.extend_from_slice(&word.to_le_bytes());
            }
            out.extend_from_slice(&f.parm_sizes);
        }

        let ofs_strings = out.len() as u32;
        out.extend_from_slice(&self.strings);

        // keep the globals word-aligned
        while out.len() % 4 != 0 {
            out.push(0);
        }
        let ofs_globals = out.len() as u32;
        for g in &self.globals {
            out.extend_from_slice(&g.bits().to_le_bytes());
        }

        let header = [
            self.version,
            self.crc,
            ofs_statements,
            self.statements.len() as u32,
            ofs_global_defs,
            self.global_defs.len() as u32,
            ofs_field_defs,
            self.field_defs.len() as u32,
            ofs_functions,
            self.functions.len() as u32,
            ofs_strings,
            self.strings.len() as u32,
            ofs_globals,
            self.globals.len() as u32,
            self.entity_fields,
        ];
        for (i, word) in header.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}

fn write_defs(out: &mut Vec<u8>, defs: &[Def]) {
    for d in defs {
        out.extend_from_slice(&d.type_tag.to_le_bytes());
        out.extend_from_slice(&d.offset.to_le_bytes());
        out.extend_from_slice(&d.name.to_le_bytes());
    }
}
