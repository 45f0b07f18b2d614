//! Packaging trailer: a host executable with a progs image appended.
//!
//! ```text
//! [ stub executable ][ progs image ][ image length: u32 LE ][ "QCVM" ]
//! ```

use crate::error::{ImageError, ImageResult};

pub const MAGIC: [u8; 4] = *b"QCVM";
pub const TRAILER_SIZE: usize = 8;

/// Concatenate a stub executable, an image and the trailer.
pub fn append(stub: &[u8], image: &[u8]) -> ImageResult<Vec<u8>> {
    let len = u32::try_from(image.len()).map_err(|_| {
        ImageError::MalformedPackage(format!("image of {} bytes is too large", image.len()))
    })?;
    let mut out = Vec::with_capacity(stub.len() + image.len() + TRAILER_SIZE);
    out.extend_from_slice(stub);
    out.extend_from_slice(image);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&MAGIC);
    Ok(out)
}

/// Locate an appended image.
///
/// Returns `Ok(None)` when the file carries no trailer.
pub fn extract(bytes: &[u8]) -> ImageResult<Option<&[u8]>> {
    if bytes.len() < TRAILER_SIZE {
        return Ok(None);
    }
    let trailer = &bytes[bytes.len() - TRAILER_SIZE..];
    if trailer[4..] != MAGIC {
        return Ok(None);
    }
    let len = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize;
    let body = bytes.len() - TRAILER_SIZE;
    if len > body {
        return Err(ImageError::MalformedPackage(format!(
            "trailer claims {len} bytes but only {body} precede it"
        )));
    }
    Ok(Some(&bytes[body - len..body]))
}
