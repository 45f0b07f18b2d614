//! QCVM progs image format.
//!
//! Decodes compiled QuakeC "progs" images (format version 6) into owned,
//! byte-order-normalized tables, and provides the tooling around them:
//!
//! - [`format`]: record layouts and the reserved-slot ABI
//! - [`opcode`]: the baseline instruction set
//! - [`loader`]: validation and normalization ([`Image::parse`])
//! - [`builder`]: assembling images without a compiler
//! - [`package`]: the executable trailer used to ship an image inside a host

pub mod builder;
pub mod error;
pub mod format;
pub mod loader;
pub mod opcode;
pub mod package;
mod slot;

pub use builder::{FieldRef, ImageBuilder};
pub use error::{ImageError, ImageResult};
pub use format::{Def, DefType, Function, Header, Statement};
pub use loader::{ByteOrder, EntityLayout, Image};
pub use opcode::Opcode;
pub use slot::Slot;
