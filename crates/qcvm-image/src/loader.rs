//! Image loading: header validation, sub-table bounds checks and byte-order
//! normalization.
//!
//! The loader never mutates the input buffer. Every multi-byte field is read
//! as the host would see it and swapped once if the host byte order differs
//! from the image's fixed little-endian order; the decoded records are owned
//! by the returned [`Image`], so loading the same bytes again normalizes from
//! pristine input and yields identical tables.

use tracing::debug;

use crate::error::{ImageError, ImageResult};
use crate::format::*;
use crate::slot::Slot;

/// Byte order of a host (real or simulated) or of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// The fixed byte order of progs images.
    pub const IMAGE: ByteOrder = ByteOrder::Little;

    /// Byte order of the machine running this code.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Reads fields as a host of the given byte order would, swapping each one
/// into image order exactly once.
struct FieldReader<'a> {
    bytes: &'a [u8],
    host: ByteOrder,
    swapped: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8], host: ByteOrder) -> Self {
        Self {
            bytes,
            host,
            swapped: 0,
        }
    }

    fn needs_swap(&self) -> bool {
        self.host != ByteOrder::IMAGE
    }

    fn u32(&mut self, at: usize) -> u32 {
        let b = [
            self.bytes[at],
            self.bytes[at + 1],
            self.bytes[at + 2],
            self.bytes[at + 3],
        ];
        let raw = match self.host {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        };
        if self.needs_swap() {
            self.swapped += 1;
            raw.swap_bytes()
        } else {
            raw
        }
    }

    fn u16(&mut self, at: usize) -> u16 {
        let b = [self.bytes[at], self.bytes[at + 1]];
        let raw = match self.host {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        };
        if self.needs_swap() {
            self.swapped += 1;
            raw.swap_bytes()
        } else {
            raw
        }
    }

    fn i32(&mut self, at: usize) -> i32 {
        self.u32(at) as i32
    }

    fn i16(&mut self, at: usize) -> i16 {
        self.u16(at) as i16
    }
}

/// A validated, normalized progs image.
///
/// Immutable after load; runtime state (globals, caches, profile counters)
/// lives in the VM.
#[derive(Debug, Clone)]
pub struct Image {
    pub header: Header,
    pub statements: Vec<Statement>,
    pub functions: Vec<Function>,
    pub global_defs: Vec<Def>,
    pub field_defs: Vec<Def>,
    pub strings: Vec<u8>,
    /// Initial global values.
    pub globals: Vec<Slot>,
    /// Fields byte-swapped during load (0 on a same-endian host).
    pub swapped_fields: usize,
}

impl Image {
    /// Load an image on this host.
    pub fn parse(bytes: &[u8]) -> ImageResult<Self> {
        Self::parse_as(bytes, ByteOrder::native())
    }

    /// Load an image as a host of byte order `host` would.
    ///
    /// Hosts normally call [`Image::parse`]; this entry point exists so
    /// opposite-endian behavior can be exercised on any machine.
    pub fn parse_as(bytes: &[u8], host: ByteOrder) -> ImageResult<Self> {
        if bytes.is_empty() {
            return Err(ImageError::InvalidBuffer("empty buffer".into()));
        }
        if bytes.len() < HEADER_SIZE {
            return Err(ImageError::InvalidBuffer(format!(
                "{} bytes is shorter than the {HEADER_SIZE}-byte header",
                bytes.len()
            )));
        }

        let mut r = FieldReader::new(bytes, host);
        let header = read_header(&mut r);

        match header.version {
            VERSION_STANDARD => {}
            VERSION_OLD | VERSION_EXTENDED => {
                return Err(ImageError::UnsupportedVersion(header.version))
            }
            other => return Err(ImageError::InvalidVersion(other)),
        }

        // Validate every table before decoding any of them.
        let len = bytes.len();
        let statements_at = table(
            "statement",
            header.ofs_statements,
            header.num_statements,
            STATEMENT_SIZE,
            len,
        )?;
        let global_defs_at = table(
            "global definition",
            header.ofs_global_defs,
            header.num_global_defs,
            DEF_SIZE,
            len,
        )?;
        let field_defs_at = table(
            "field definition",
            header.ofs_field_defs,
            header.num_field_defs,
            DEF_SIZE,
            len,
        )?;
        let functions_at = table(
            "function",
            header.ofs_functions,
            header.num_functions,
            FUNCTION_SIZE,
            len,
        )?;
        let strings_at = table("string", header.ofs_strings, header.len_strings, 1, len)?;
        let globals_at = table(
            "global",
            header.ofs_globals,
            header.num_globals,
            GLOBAL_SIZE,
            len,
        )?;

        let statements = (0..header.num_statements as usize)
            .map(|i| {
                let at = statements_at + i * STATEMENT_SIZE;
                Statement {
                    opcode: r.u16(at),
                    a: r.i16(at + 2),
                    b: r.i16(at + 4),
                    c: r.i16(at + 6),
                }
            })
            .collect();

        let functions = (0..header.num_functions as usize)
            .map(|i| read_function(&mut r, functions_at + i * FUNCTION_SIZE))
            .collect();

        let global_defs = (0..header.num_global_defs as usize)
            .map(|i| read_def(&mut r, global_defs_at + i * DEF_SIZE))
            .collect();
        let field_defs = (0..header.num_field_defs as usize)
            .map(|i| read_def(&mut r, field_defs_at + i * DEF_SIZE))
            .collect();

        let strings = bytes[strings_at..strings_at + header.len_strings as usize].to_vec();

        let globals = (0..header.num_globals as usize)
            .map(|i| Slot::from_bits(r.u32(globals_at + i * GLOBAL_SIZE)))
            .collect();

        let image = Image {
            header,
            statements,
            functions,
            global_defs,
            field_defs,
            strings,
            globals,
            swapped_fields: r.swapped,
        };

        debug!(
            statements = image.statements.len(),
            functions = image.functions.len(),
            globals = image.globals.len(),
            global_defs = image.global_defs.len(),
            field_defs = image.field_defs.len(),
            entity_fields = image.header.entity_fields,
            swapped = image.swapped_fields,
            "progs image loaded"
        );

        Ok(image)
    }

    /// NUL-terminated bytes at a static string offset; empty when out of range.
    pub fn string(&self, offset: i32) -> &[u8] {
        let Ok(start) = usize::try_from(offset) else {
            return &[];
        };
        let Some(tail) = self.strings.get(start..) else {
            return &[];
        };
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        &tail[..end]
    }

    /// Lossy UTF-8 view of a static string.
    pub fn string_lossy(&self, offset: i32) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.string(offset))
    }

    /// Number of 4-byte words in one entity.
    pub fn entity_fields(&self) -> usize {
        self.header.entity_fields as usize
    }
}

/// Per-entity storage requirements, readable before a VM exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLayout {
    /// Field words per entity.
    pub fields: usize,
    /// Bytes per entity.
    pub size: usize,
}

impl EntityLayout {
    /// Read the entity layout from an image header without loading the image.
    pub fn query(bytes: &[u8]) -> ImageResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ImageError::InvalidBuffer(
                "buffer too short for a header".into(),
            ));
        }
        let fields = u32::from_le_bytes([bytes[56], bytes[57], bytes[58], bytes[59]]) as usize;
        Ok(Self {
            fields,
            size: fields * GLOBAL_SIZE,
        })
    }
}

fn read_header(r: &mut FieldReader<'_>) -> Header {
    Header {
        version: r.u32(0),
        crc: r.u32(4),
        ofs_statements: r.u32(8),
        num_statements: r.u32(12),
        ofs_global_defs: r.u32(16),
        num_global_defs: r.u32(20),
        ofs_field_defs: r.u32(24),
        num_field_defs: r.u32(28),
        ofs_functions: r.u32(32),
        num_functions: r.u32(36),
        ofs_strings: r.u32(40),
        len_strings: r.u32(44),
        ofs_globals: r.u32(48),
        num_globals: r.u32(52),
        entity_fields: r.u32(56),
    }
}

fn read_function(r: &mut FieldReader<'_>, at: usize) -> Function {
    let mut parm_sizes = [0u8; MAX_PARMS];
    parm_sizes.copy_from_slice(&r.bytes[at + 28..at + 36]);
    Function {
        first_statement: r.i32(at),
        first_parm: r.i32(at + 4),
        num_locals: r.i32(at + 8),
        profile: r.i32(at + 12),
        name: r.i32(at + 16),
        file: r.i32(at + 20),
        num_parms: r.i32(at + 24),
        parm_sizes,
    }
}

fn read_def(r: &mut FieldReader<'_>, at: usize) -> Def {
    Def {
        type_tag: r.u16(at),
        offset: r.u16(at + 2),
        name: r.i32(at + 4),
    }
}

/// Bounds-check one sub-table and return its start offset.
fn table(
    name: &'static str,
    offset: u32,
    count: u32,
    size: usize,
    len: usize,
) -> ImageResult<usize> {
    let malformed = || ImageError::MalformedTable {
        table: name,
        offset,
        count,
        size,
        len,
    };
    let start = offset as usize;
    let end = (count as usize)
        .checked_mul(size)
        .and_then(|bytes| bytes.checked_add(start))
        .ok_or_else(malformed)?;
    if end > len {
        return Err(malformed());
    }
    Ok(start)
}
