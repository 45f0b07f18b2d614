//! Runtime error types for the VM.

use qcvm_image::ImageError;
use thiserror::Error;

/// Everything that can go wrong while initializing or driving a VM.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// The image failed to load; no VM was created.
    #[error(transparent)]
    Image(#[from] ImageError),

    // ── Recoverable: the VM stays consistent ──
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    #[error("builtin not found: {0}")]
    BuiltinNotFound(String),

    #[error("argument index {0} is out of range")]
    ArgumentOutOfRange(usize),

    #[error("no tempstrings buffer configured")]
    NoTempStrings,

    #[error("no entities buffer configured")]
    NoEntities,

    #[error("all {0} entities are allocated")]
    EntitiesExhausted(usize),

    /// `step` was called with no function loaded.
    #[error("no function is executing")]
    NotRunning,

    /// A host-side accessor named a global outside the global array.
    #[error("global {0} is out of range")]
    GlobalOutOfRange(usize),

    /// Raised by builtins or state handlers to abort the current run.
    #[error("host error: {0}")]
    Host(String),

    // ── Fatal to the current run ──
    #[error("invalid opcode {opcode} at statement {statement}")]
    InvalidOpcode { opcode: u16, statement: i32 },

    #[error("invalid function {0}")]
    InvalidFunction(i32),

    #[error("stack overflow")]
    StackOverflow,

    #[error("stack underflow")]
    StackUnderflow,

    #[error("statement {0} is outside the statement table")]
    StatementOutOfRange(i32),

    /// A statement operand or entity reference fell outside its buffer.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("statement limit of {0} exceeded")]
    StatementLimit(u64),
}

impl VmError {
    /// Whether the error aborts the current run.
    ///
    /// After a fatal error the call stack is left as it was at the failing
    /// statement. A recoverable error raised during [`crate::Vm::run`]
    /// unwinds every frame the run entered, so the instance can be used
    /// again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::InvalidOpcode { .. }
                | VmError::InvalidFunction(_)
                | VmError::StackOverflow
                | VmError::StackUnderflow
                | VmError::StatementOutOfRange(_)
                | VmError::InvalidAddress(_)
                | VmError::StatementLimit(_)
        )
    }
}

/// VM result type alias.
pub type VmResult<T> = Result<T, VmError>;
