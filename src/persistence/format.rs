//! Model file layout.
//!
//! # File Layout
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Magic (4B): "SBVC"                      │
//! │ Version (4B, u32 LE)                    │
//! ├─────────────────────────────────────────┤
//! │ Args: u64 length + JSON bytes           │
//! ├─────────────────────────────────────────┤
//! │ Dictionary:                             │
//! │   - size, nwords, nlabels, ntokens      │
//! │   - prune flag (+ bucket map)           │
//! │   - entries: token, count, kind         │
//! ├─────────────────────────────────────────┤
//! │ Input matrix:                           │
//! │   - kind (1B): 0 dense, 1 quantized     │
//! │   - dense: rows, cols, f32 LE data      │
//! │   - quantized: rows, cols, codebooks,   │
//! │     codes, optional norm quantizer      │
//! ├─────────────────────────────────────────┤
//! │ Output matrix (same encoding)           │
//! ├─────────────────────────────────────────┤
//! │ Huffman tree (hierarchical softmax):    │
//! │   - leaves, then per node parent, left, │
//! │     right, count, branch bit            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Nothing may follow the last section.
//!
//! # Compatibility
//!
//! - v1: initial format
//!
//! A reader rejects any other version with
//! [`Error::UnsupportedVersion`](crate::Error::UnsupportedVersion).

use std::io::{Read, Write};

use super::codec;
use crate::error::{Error, Result};

/// Magic bytes of a model file.
pub const MAGIC: [u8; 4] = *b"SBVC";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Storage of one parameter matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MatrixKind {
    Dense = 0,
    Quantized = 1,
}

impl TryFrom<u8> for MatrixKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MatrixKind::Dense),
            1 => Ok(MatrixKind::Quantized),
            other => Err(Error::Format(format!("unknown matrix kind {other}"))),
        }
    }
}

pub fn write_header<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_all(&MAGIC)?;
    codec::write_u32(writer, FORMAT_VERSION)
}

/// Check magic and version.
pub fn read_header<R: Read>(reader: &mut R) -> Result<()> {
    let magic = codec::read_byte_vec(reader, MAGIC.len(), "magic")?;
    if magic != MAGIC {
        return Err(Error::Format(format!(
            "bad magic {magic:?}, expected {:?}",
            MAGIC
        )));
    }
    let found = codec::read_u32(reader, "format version")?;
    if found != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion {
            found,
            supported: FORMAT_VERSION,
        });
    }
    Ok(())
}

/// Fail unless `reader` is exhausted.
pub fn expect_end<R: Read>(reader: &mut R) -> Result<()> {
    let mut probe = [0u8; 1];
    if reader.read(&mut probe)? != 0 {
        return Err(Error::Format("trailing bytes after the last section".into()));
    }
    Ok(())
}
