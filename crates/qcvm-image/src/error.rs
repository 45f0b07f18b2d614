//! Image loading error types.

use thiserror::Error;

/// Errors raised while validating or decoding a progs image.
///
/// All of these are fatal to initialization: no partially loaded image is
/// ever handed out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The buffer is empty or too short to hold a header.
    #[error("invalid progs buffer: {0}")]
    InvalidBuffer(String),

    /// A recognized progs version that this VM does not execute.
    #[error("unsupported progs version {0}")]
    UnsupportedVersion(u32),

    /// A version tag that is not any known progs format.
    #[error("unrecognized progs version {0}")]
    InvalidVersion(u32),

    /// A sub-table (offset, count) pair points outside the buffer.
    #[error("malformed {table} table: offset {offset}, {count} entries of {size} bytes exceed buffer of {len} bytes")]
    MalformedTable {
        table: &'static str,
        offset: u32,
        count: u32,
        size: usize,
        len: usize,
    },

    /// The packaging trailer is present but inconsistent with the file.
    #[error("malformed package trailer: {0}")]
    MalformedPackage(String),
}

/// Image result type alias.
pub type ImageResult<T> = Result<T, ImageError>;
