//! On-disk record layouts and ABI constants of the version 6 progs format.
//!
//! All multi-byte fields are little-endian in the file:
//!
//! ```text
//! header     : 15 × u32                                        (60 bytes)
//! statement  : op u16, a i16, b i16, c i16                      (8 bytes)
//! function   : 7 × i32, parm_sizes [u8; 8]                      (36 bytes)
//! definition : type u16, offset u16, name i32                   (8 bytes)
//! global     : 4 raw bytes                                      (4 bytes)
//! ```

use serde::Serialize;

// ── Versions ─────────────────────────────────────────────────────────────────

/// The only executable format version.
pub const VERSION_STANDARD: u32 = 6;
/// Pre-release Quake progs.
pub const VERSION_OLD: u32 = 3;
/// Extended (FTE / 32-bit operand) progs.
pub const VERSION_EXTENDED: u32 = 7;

// ── Record sizes ─────────────────────────────────────────────────────────────

pub const HEADER_SIZE: usize = 60;
pub const STATEMENT_SIZE: usize = 8;
pub const FUNCTION_SIZE: usize = 36;
pub const DEF_SIZE: usize = 8;
pub const GLOBAL_SIZE: usize = 4;

// ── Reserved global offsets ──────────────────────────────────────────────────
// Shared by every function call; never ordinary locals.

pub const OFS_NULL: usize = 0;
pub const OFS_RETURN: usize = 1;
pub const OFS_PARM0: usize = 4;
/// Words between consecutive parameter slots (room for a vector).
pub const PARM_STRIDE: usize = 3;
/// First slot free for program globals.
pub const OFS_RESERVED: usize = 28;

/// Maximum call arguments.
pub const MAX_PARMS: usize = 8;

/// Global slot of parameter `i`.
pub const fn parm_offset(i: usize) -> usize {
    OFS_PARM0 + i * PARM_STRIDE
}

/// Set on a global definition's type tag when the global is saved with the game.
pub const DEF_SAVEGLOBAL: u16 = 0x8000;

// ── Records ──────────────────────────────────────────────────────────────────

/// Image header, in file order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Header {
    pub version: u32,
    pub crc: u32,
    pub ofs_statements: u32,
    pub num_statements: u32,
    pub ofs_global_defs: u32,
    pub num_global_defs: u32,
    pub ofs_field_defs: u32,
    pub num_field_defs: u32,
    pub ofs_functions: u32,
    pub num_functions: u32,
    pub ofs_strings: u32,
    pub len_strings: u32,
    pub ofs_globals: u32,
    pub num_globals: u32,
    pub entity_fields: u32,
}

/// One instruction: opcode plus three global-slot operands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub opcode: u16,
    pub a: i16,
    pub b: i16,
    pub c: i16,
}

impl Statement {
    pub const fn new(opcode: u16, a: i16, b: i16, c: i16) -> Self {
        Self { opcode, a, b, c }
    }
}

/// A function record.
///
/// `first_statement` doubles as the native-call marker: `>= 1` is a bytecode
/// body, `0` is a builtin to be resolved by name, `< 0` is builtin
/// `-(first_statement + 1)` of the host table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Function {
    pub first_statement: i32,
    pub first_parm: i32,
    pub num_locals: i32,
    pub profile: i32,
    pub name: i32,
    pub file: i32,
    pub num_parms: i32,
    pub parm_sizes: [u8; MAX_PARMS],
}

impl Function {
    pub fn has_body(&self) -> bool {
        self.first_statement >= 1
    }

    /// Builtin table index encoded in a negative marker.
    pub fn builtin_index(&self) -> Option<usize> {
        if self.first_statement < 0 {
            usize::try_from(-(self.first_statement as i64) - 1).ok()
        } else {
            None
        }
    }

    /// Declared parameter widths, clamped to the eight argument triples.
    pub fn parm_widths(&self) -> &[u8] {
        let n = self.num_parms.clamp(0, MAX_PARMS as i32) as usize;
        &self.parm_sizes[..n]
    }
}

/// Variable type tags used by global and field definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefType {
    Void,
    String,
    Float,
    Vector,
    Entity,
    Field,
    Function,
    Pointer,
}

impl DefType {
    pub fn from_tag(tag: u16) -> Option<Self> {
        Some(match tag & !DEF_SAVEGLOBAL {
            0 => DefType::Void,
            1 => DefType::String,
            2 => DefType::Float,
            3 => DefType::Vector,
            4 => DefType::Entity,
            5 => DefType::Field,
            6 => DefType::Function,
            7 => DefType::Pointer,
            _ => return None,
        })
    }

    pub const fn tag(self) -> u16 {
        self as u16
    }

    /// Words occupied by a value of this type.
    pub const fn width(self) -> usize {
        match self {
            DefType::Vector => 3,
            _ => 1,
        }
    }
}

/// A global or field definition used for name lookup.
///
/// For globals `offset` is a global slot; for fields it is a word offset
/// inside every entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Def {
    pub type_tag: u16,
    pub offset: u16,
    pub name: i32,
}

impl Def {
    pub fn def_type(&self) -> Option<DefType> {
        DefType::from_tag(self.type_tag)
    }

    pub fn is_saved(&self) -> bool {
        self.type_tag & DEF_SAVEGLOBAL != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parm_offsets_match_abi() {
        assert_eq!(parm_offset(0), 4);
        assert_eq!(parm_offset(7), 25);
        assert_eq!(parm_offset(MAX_PARMS), OFS_RESERVED);
    }

    #[test]
    fn builtin_marker_decoding() {
        let mut f = Function::default();
        assert_eq!(f.builtin_index(), None);
        f.first_statement = -1;
        assert_eq!(f.builtin_index(), Some(0));
        f.first_statement = -12;
        assert_eq!(f.builtin_index(), Some(11));
        f.first_statement = 5;
        assert!(f.has_body());
    }

    #[test]
    fn def_type_masks_saveglobal() {
        let d = Def {
            type_tag: DEF_SAVEGLOBAL | 4,
            offset: 30,
            name: 1,
        };
        assert_eq!(d.def_type(), Some(DefType::Entity));
        assert!(d.is_saved());
        assert_eq!(DefType::from_tag(9), None);
    }

    #[test]
    fn records_dump_as_json() {
        let header = Header {
            version: VERSION_STANDARD,
            entity_fields: 12,
            ..Header::default()
        };
        let json = serde_json::to_value(header).unwrap();
        assert_eq!(json["version"], 6);
        assert_eq!(json["entity_fields"], 12);

        let f = Function {
            first_statement: -3,
            num_parms: 2,
            parm_sizes: [3, 1, 0, 0, 0, 0, 0, 0],
            ..Function::default()
        };
        let json = serde_json::to_value(f).unwrap();
        assert_eq!(json["first_statement"], -3);
        assert_eq!(json["parm_sizes"], serde_json::json!([3, 1, 0, 0, 0, 0, 0, 0]));

        assert_eq!(serde_json::to_value(DefType::Vector).unwrap(), "vector");
        let d = Def {
            type_tag: DEF_SAVEGLOBAL | 2,
            offset: 40,
            name: 7,
        };
        assert_eq!(serde_json::to_value(d).unwrap()["offset"], 40);
    }
}
