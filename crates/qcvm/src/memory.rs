//! Typed, bounds-checked access to the global array and the entity buffer.
//!
//! Both regions are plain arrays of [`Slot`]s. Offsets arriving from
//! bytecode are validated at the access site; nothing here hands out raw
//! pointers.

use qcvm_image::Slot;

use crate::error::{VmError, VmResult};

/// The shared global array: reserved slots, parameters, locals and
/// program globals.
#[derive(Debug, Clone)]
pub struct Globals {
    slots: Vec<Slot>,
}

impl Globals {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether `width` words starting at `ofs` are in range.
    pub fn contains(&self, ofs: usize, width: usize) -> bool {
        ofs.checked_add(width).is_some_and(|end| end <= self.slots.len())
    }

    fn check(&self, ofs: usize, width: usize) -> VmResult<()> {
        if self.contains(ofs, width) {
            Ok(())
        } else {
            Err(VmError::InvalidAddress(format!(
                "global {ofs}+{width} outside {} globals",
                self.slots.len()
            )))
        }
    }

    pub fn get(&self, ofs: usize) -> VmResult<Slot> {
        self.check(ofs, 1)?;
        Ok(self.slots[ofs])
    }

    pub fn set(&mut self, ofs: usize, value: Slot) -> VmResult<()> {
        self.check(ofs, 1)?;
        self.slots[ofs] = value;
        Ok(())
    }

    pub fn float(&self, ofs: usize) -> VmResult<f32> {
        self.get(ofs).map(Slot::as_float)
    }

    pub fn set_float(&mut self, ofs: usize, f: f32) -> VmResult<()> {
        self.set(ofs, Slot::from_float(f))
    }

    pub fn int(&self, ofs: usize) -> VmResult<i32> {
        self.get(ofs).map(Slot::as_int)
    }

    pub fn set_int(&mut self, ofs: usize, i: i32) -> VmResult<()> {
        self.set(ofs, Slot::from_int(i))
    }

    pub fn vector(&self, ofs: usize) -> VmResult<[f32; 3]> {
        let w = self.words(ofs, 3)?;
        Ok([w[0].as_float(), w[1].as_float(), w[2].as_float()])
    }

    pub fn set_vector(&mut self, ofs: usize, v: [f32; 3]) -> VmResult<()> {
        self.write(ofs, &v.map(Slot::from_float))
    }

    pub fn words(&self, ofs: usize, n: usize) -> VmResult<&[Slot]> {
        self.check(ofs, n)?;
        Ok(&self.slots[ofs..ofs + n])
    }

    pub fn write(&mut self, ofs: usize, words: &[Slot]) -> VmResult<()> {
        self.check(ofs, words.len())?;
        self.slots[ofs..ofs + words.len()].copy_from_slice(words);
        Ok(())
    }

    /// Copy `n` words between two global ranges (which may overlap).
    pub fn copy(&mut self, from: usize, to: usize, n: usize) -> VmResult<()> {
        self.check(from, n)?;
        self.check(to, n)?;
        self.slots.copy_within(from..from + n, to);
        Ok(())
    }
}

/// Per-entity field storage: `capacity` entities of `fields` words each.
#[derive(Debug, Clone)]
pub struct Entities {
    words: Vec<Slot>,
    fields: usize,
    capacity: usize,
    allocated: usize,
}

impl Entities {
    pub fn new(fields: usize, capacity: usize) -> Self {
        Self {
            words: vec![Slot::ZERO; fields.saturating_mul(capacity)],
            fields,
            capacity,
            allocated: 0,
        }
    }

    pub fn fields(&self) -> usize {
        self.fields
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entities handed out by [`Entities::allocate`] so far.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Hand out the next unused entity index, starting at 0.
    pub fn allocate(&mut self) -> VmResult<i32> {
        self.configured()?;
        if self.allocated >= self.capacity {
            return Err(VmError::EntitiesExhausted(self.capacity));
        }
        let index =
            i32::try_from(self.allocated).map_err(|_| VmError::EntitiesExhausted(self.capacity))?;
        self.allocated += 1;
        Ok(index)
    }

    /// Bytes per entity.
    pub fn entity_size(&self) -> usize {
        self.fields * 4
    }

    fn configured(&self) -> VmResult<()> {
        if self.capacity == 0 {
            Err(VmError::NoEntities)
        } else {
            Ok(())
        }
    }

    /// Word index of `width` words at `field` of `entity`.
    pub fn field_word(&self, entity: i32, field: i32, width: usize) -> VmResult<usize> {
        self.configured()?;
        let (Ok(e), Ok(f)) = (usize::try_from(entity), usize::try_from(field)) else {
            return Err(VmError::InvalidAddress(format!(
                "entity {entity} field {field}"
            )));
        };
        if e >= self.capacity || f + width > self.fields {
            return Err(VmError::InvalidAddress(format!(
                "entity {entity} field {field} outside {} entities of {} fields",
                self.capacity, self.fields
            )));
        }
        Ok(e * self.fields + f)
    }

    /// Byte offset of a field from the start of the buffer, as `ADDRESS`
    /// produces it.
    pub fn address(&self, entity: i32, field: i32) -> VmResult<i32> {
        let word = self.field_word(entity, field, 1)?;
        i32::try_from(word * 4)
            .map_err(|_| VmError::InvalidAddress(format!("entity {entity} field {field}")))
    }

    /// Word index named by a byte offset produced by `ADDRESS`.
    pub fn pointer_word(&self, byte: i32, width: usize) -> VmResult<usize> {
        self.configured()?;
        let invalid = || VmError::InvalidAddress(format!("entity pointer {byte}"));
        let byte = usize::try_from(byte).map_err(|_| invalid())?;
        if byte % 4 != 0 {
            return Err(invalid());
        }
        let word = byte / 4;
        if word + width > self.words.len() {
            return Err(invalid());
        }
        Ok(word)
    }

    /// `word..word + n` must come from [`Entities::field_word`] or
    /// [`Entities::pointer_word`].
    pub(crate) fn read(&self, word: usize, n: usize) -> &[Slot] {
        &self.words[word..word + n]
    }

    pub(crate) fn write(&mut self, word: usize, values: &[Slot]) {
        self.words[word..word + values.len()].copy_from_slice(values);
    }

    /// Zero every field of one entity.
    pub fn clear(&mut self, entity: i32) -> VmResult<()> {
        if self.fields == 0 {
            return self.configured();
        }
        let start = self.field_word(entity, 0, self.fields)?;
        self.words[start..start + self.fields].fill(Slot::ZERO);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globals_bounds() {
        let mut g = Globals::new(vec![Slot::ZERO; 4]);
        assert!(g.set_vector(1, [1.0, 2.0, 3.0]).is_ok());
        assert_eq!(g.vector(1).unwrap(), [1.0, 2.0, 3.0]);
        assert!(matches!(g.vector(2), Err(VmError::InvalidAddress(_))));
        assert!(g.get(4).is_err());
        assert!(!g.contains(usize::MAX, 2));
    }

    #[test]
    fn overlapping_copy() {
        let mut g = Globals::new((0..6).map(Slot::from_int).collect());
        g.copy(0, 2, 3).unwrap();
        assert_eq!(g.int(2).unwrap(), 0);
        assert_eq!(g.int(4).unwrap(), 2);
    }

    #[test]
    fn entity_words_do_not_alias() {
        let e = Entities::new(4, 3);
        assert_eq!(e.field_word(0, 1, 3).unwrap(), 1);
        assert_eq!(e.field_word(2, 1, 3).unwrap(), 9);
        assert!(e.field_word(0, 2, 3).is_err());
        assert!(e.field_word(3, 0, 1).is_err());
        assert!(e.field_word(-1, 0, 1).is_err());
    }

    #[test]
    fn allocation_counts_up_to_capacity() {
        let mut e = Entities::new(4, 2);
        assert_eq!(e.allocate(), Ok(0));
        assert_eq!(e.allocate(), Ok(1));
        assert_eq!(e.allocate(), Err(VmError::EntitiesExhausted(2)));
        assert_eq!(e.allocated(), 2);
        assert_eq!(Entities::new(4, 0).allocate(), Err(VmError::NoEntities));
    }

    #[test]
    fn address_and_pointer_agree() {
        let e = Entities::new(4, 3);
        let addr = e.address(2, 3).unwrap();
        assert_eq!(addr, 44);
        assert_eq!(e.pointer_word(addr, 1).unwrap(), 11);
        assert!(e.pointer_word(addr, 3).is_err());
        assert!(e.pointer_word(2, 1).is_err());
    }

    #[test]
    fn unconfigured_buffer() {
        let e = Entities::new(4, 0);
        assert_eq!(e.field_word(0, 0, 1), Err(VmError::NoEntities));
        assert_eq!(e.pointer_word(0, 1), Err(VmError::NoEntities));
    }
}
