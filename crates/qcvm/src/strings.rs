//! String resolution: static image strings and the tempstrings ring.
//!
//! String values in slots are byte offsets. Non-negative offsets index the
//! image's string blob; negative offsets `-pos` index the VM-owned
//! tempstrings buffer, so the two spaces never collide.

use qcvm_image::Image;
use tracing::trace;

use crate::error::{VmError, VmResult};

/// Ring buffer for strings synthesized by native code.
///
/// Position 0 always holds a NUL; allocation starts at 1 and wraps back to 1
/// when the next string and its terminator no longer fit.
#[derive(Debug, Clone)]
pub struct TempStrings {
    buf: Vec<u8>,
    cursor: usize,
}

impl TempStrings {
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            cursor: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Next allocation position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Copy `s` into the ring and return its (negative) string offset.
    ///
    /// Strings longer than the ring are truncated.
    pub fn alloc(&mut self, s: &[u8]) -> VmResult<i32> {
        if self.buf.is_empty() {
            return Err(VmError::NoTempStrings);
        }
        if self.buf.len() < 2 {
            return Ok(0);
        }
        // position 0 plus a terminator
        let room = self.buf.len() - 2;
        let s = &s[..s.len().min(room)];
        if self.cursor + s.len() + 1 > self.buf.len() {
            trace!(cursor = self.cursor, len = s.len(), "tempstrings wrapped");
            self.cursor = 1;
        }
        let pos = self.cursor;
        self.buf[pos..pos + s.len()].copy_from_slice(s);
        self.buf[pos + s.len()] = 0;
        self.cursor += s.len() + 1;
        let pos = i32::try_from(pos)
            .map_err(|_| VmError::InvalidAddress(format!("tempstring position {pos}")))?;
        Ok(-pos)
    }

    /// Bytes at ring position `pos` up to the next NUL.
    pub fn get(&self, pos: usize) -> &[u8] {
        let Some(tail) = self.buf.get(pos..) else {
            return &[];
        };
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        &tail[..end]
    }
}

/// Resolve a string offset against both string spaces.
pub fn resolve<'a>(image: &'a Image, temp: &'a TempStrings, offset: i32) -> &'a [u8] {
    if offset >= 0 {
        image.string(offset)
    } else {
        temp.get(offset.unsigned_abs() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_negative_and_distinct() {
        let mut t = TempStrings::new(32);
        let a = t.alloc(b"abc").unwrap();
        let b = t.alloc(b"abc").unwrap();
        assert_eq!(a, -1);
        assert_eq!(b, -5);
        assert_eq!(t.get(1), b"abc");
        assert_eq!(t.get(5), b"abc");
    }

    #[test]
    fn wraps_to_one() {
        let mut t = TempStrings::new(10);
        assert_eq!(t.alloc(b"hello").unwrap(), -1);
        assert_eq!(t.cursor(), 7);
        assert_eq!(t.alloc(b"wor").unwrap(), -1);
        assert_eq!(t.get(1), b"wor");
        assert_eq!(t.get(0), b"");
    }

    #[test]
    fn truncates_oversized() {
        let mut t = TempStrings::new(6);
        let ofs = t.alloc(b"abcdefgh").unwrap();
        assert_eq!(t.get(ofs.unsigned_abs() as usize), b"abcd");
    }

    #[test]
    fn unconfigured() {
        let mut t = TempStrings::new(0);
        assert_eq!(t.alloc(b"x"), Err(VmError::NoTempStrings));
        assert_eq!(t.get(3), b"");
    }
}
