//! The 4-byte global/field cell.
//!
//! A slot carries no type tag. The opcode reading it decides whether the
//! bits are a float, an integer, a string offset, a function index or an
//! entity index, exactly as the on-disk format does.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One 32-bit cell of the global array or of an entity's field storage.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot(u32);

impl Slot {
    /// The all-zero cell (`0.0`, `0`, null string, null function, world).
    pub const ZERO: Slot = Slot(0);

    pub const fn from_bits(bits: u32) -> Self {
        Slot(bits)
    }

    pub fn from_float(f: f32) -> Self {
        Slot(f.to_bits())
    }

    pub const fn from_int(i: i32) -> Self {
        Slot(i as u32)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn as_float(self) -> f32 {
        f32::from_bits(self.0)
    }

    pub const fn as_int(self) -> i32 {
        self.0 as i32
    }

    /// Byte offset into the string table (negative: tempstring).
    pub const fn as_string(self) -> i32 {
        self.0 as i32
    }

    /// Index into the function table.
    pub const fn as_function(self) -> i32 {
        self.0 as i32
    }

    /// Index into the entity buffer.
    pub const fn as_entity(self) -> i32 {
        self.0 as i32
    }

    /// Float truthiness as QuakeC sees it: anything but `±0.0`.
    pub fn is_true_float(self) -> bool {
        self.as_float() != 0.0
    }

    /// Comparison results are stored as `1.0` / `0.0`.
    pub fn from_bool(b: bool) -> Self {
        Slot::from_float(if b { 1.0 } else { 0.0 })
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({:#010x} = {} / {})", self.0, self.as_float(), self.as_int())
    }
}
