//! The baseline (version 6) instruction set.
//!
//! Operands `a`, `b`, `c` are global slot indices unless noted. The
//! opcode, not the data, decides how a slot is interpreted.

use serde::Serialize;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    /// Return from the entry function; same semantics as `Return`.
    Done = 0,

    // Arithmetic: c = a <op> b
    MulF = 1,
    /// Dot product: float c = vector a · vector b
    MulV = 2,
    /// vector c = float a * vector b
    MulFV = 3,
    /// vector c = vector a * float b
    MulVF = 4,
    DivF = 5,
    AddF = 6,
    AddV = 7,
    SubF = 8,
    SubV = 9,

    // Equality: float c = a == b
    EqF = 10,
    EqV = 11,
    /// String content comparison.
    EqS = 12,
    EqE = 13,
    EqFnc = 14,

    NeF = 15,
    NeV = 16,
    NeS = 17,
    NeE = 18,
    NeFnc = 19,

    // Relational, floats only
    Le = 20,
    Ge = 21,
    Lt = 22,
    Gt = 23,

    // Field loads: c = entity(a).field(b)
    LoadF = 24,
    LoadV = 25,
    LoadS = 26,
    LoadEnt = 27,
    LoadFld = 28,
    LoadFnc = 29,

    /// int c = byte offset of entity(a).field(b) in the entity buffer
    Address = 30,

    // Direct stores: b = a
    StoreF = 31,
    StoreV = 32,
    StoreS = 33,
    StoreEnt = 34,
    StoreFld = 35,
    StoreFnc = 36,

    // Indirect stores: *entity_buffer[b] = a
    StorePF = 37,
    StorePV = 38,
    StorePS = 39,
    StorePEnt = 40,
    StorePFld = 41,
    StorePFnc = 42,

    /// Copy the vector at a into the return slots and leave the function.
    Return = 43,

    // Logical not: float c = !a
    NotF = 44,
    NotV = 45,
    NotS = 46,
    NotEnt = 47,
    NotFnc = 48,

    /// if a: statement += b
    If = 49,
    /// if !a: statement += b
    IfNot = 50,

    // Calls: a = function; argument count is the ordinal offset from Call0
    Call0 = 51,
    Call1 = 52,
    Call2 = 53,
    Call3 = 54,
    Call4 = 55,
    Call5 = 56,
    Call6 = 57,
    Call7 = 58,
    Call8 = 59,

    /// Host callback: a = animation frame, b = think function
    State = 60,
    /// statement += a
    Goto = 61,

    And = 62,
    Or = 63,
    BitAnd = 64,
    BitOr = 65,
}

/// All opcodes in ordinal order.
const OPCODES: [Opcode; 66] = {
    use Opcode::*;
    [
        Done, MulF, MulV, MulFV, MulVF, DivF, AddF, AddV, SubF, SubV, EqF, EqV, EqS, EqE,
        EqFnc, NeF, NeV, NeS, NeE, NeFnc, Le, Ge, Lt, Gt, LoadF, LoadV, LoadS, LoadEnt,
        LoadFld, LoadFnc, Address, StoreF, StoreV, StoreS, StoreEnt, StoreFld, StoreFnc,
        StorePF, StorePV, StorePS, StorePEnt, StorePFld, StorePFnc, Return, NotF, NotV,
        NotS, NotEnt, NotFnc, If, IfNot, Call0, Call1, Call2, Call3, Call4, Call5, Call6,
        Call7, Call8, State, Goto, And, Or, BitAnd, BitOr,
    ]
};

const NAMES: [&str; 66] = [
    "DONE", "MUL_F", "MUL_V", "MUL_FV", "MUL_VF", "DIV_F", "ADD_F", "ADD_V", "SUB_F", "SUB_V",
    "EQ_F", "EQ_V", "EQ_S", "EQ_E", "EQ_FNC", "NE_F", "NE_V", "NE_S", "NE_E", "NE_FNC", "LE",
    "GE", "LT", "GT", "LOAD_F", "LOAD_V", "LOAD_S", "LOAD_ENT", "LOAD_FLD", "LOAD_FNC",
    "ADDRESS", "STORE_F", "STORE_V", "STORE_S", "STORE_ENT", "STORE_FLD", "STORE_FNC",
    "STOREP_F", "STOREP_V", "STOREP_S", "STOREP_ENT", "STOREP_FLD", "STOREP_FNC", "RETURN",
    "NOT_F", "NOT_V", "NOT_S", "NOT_ENT", "NOT_FNC", "IF", "IFNOT", "CALL0", "CALL1", "CALL2",
    "CALL3", "CALL4", "CALL5", "CALL6", "CALL7", "CALL8", "STATE", "GOTO", "AND", "OR",
    "BITAND", "BITOR",
];

impl Opcode {
    /// Number of opcodes in the baseline set.
    pub const COUNT: usize = OPCODES.len();

    /// Decode a raw opcode; `None` for anything outside the baseline set.
    pub fn from_u16(raw: u16) -> Option<Self> {
        OPCODES.get(raw as usize).copied()
    }

    /// Mnemonic used in traces and disassembly.
    pub fn name(self) -> &'static str {
        NAMES[self as usize]
    }

    /// Argument count of a call opcode.
    pub fn call_argc(self) -> Option<usize> {
        let raw = self as u16;
        if (Opcode::Call0 as u16..=Opcode::Call8 as u16).contains(&raw) {
            Some((raw - Opcode::Call0 as u16) as usize)
        } else {
            None
        }
    }

    /// Call opcode for `argc` arguments.
    pub fn call(argc: usize) -> Option<Self> {
        if argc > 8 {
            return None;
        }
        Self::from_u16(Opcode::Call0 as u16 + argc as u16)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
