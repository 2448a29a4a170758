//! Little-endian primitive codec for the model file.
//!
//! Reads fail closed: a short read is reported as [`Error::Format`] rather
//! than as a generic I/O error, so a truncated model never half-loads.

use std::io::{ErrorKind, Read, Write};

use crate::error::{Error, Result};

/// Upper bound on any length-prefixed string (token or config blob).
const MAX_STRING_BYTES: u64 = 1 << 24;

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::Format(format!("truncated while reading {what}"))
        } else {
            Error::Io(e)
        }
    })
}

pub fn write_u8<W: Write>(writer: &mut W, v: u8) -> Result<()> {
    writer.write_all(&[v])?;
    Ok(())
}

pub fn write_u32<W: Write>(writer: &mut W, v: u32) -> Result<()> {
    writer.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u64<W: Write>(writer: &mut W, v: u64) -> Result<()> {
    writer.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_f32<W: Write>(writer: &mut W, v: f32) -> Result<()> {
    writer.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_f32_slice<W: Write>(writer: &mut W, values: &[f32]) -> Result<()> {
    for v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

/// Length-prefixed (u64) byte string.
pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    write_u64(writer, bytes.len() as u64)?;
    writer.write_all(bytes)?;
    Ok(())
}

pub fn write_str<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    write_bytes(writer, s.as_bytes())
}

pub fn read_u8<R: Read>(reader: &mut R, what: &str) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf, what)?;
    Ok(buf[0])
}

pub fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64<R: Read>(reader: &mut R, what: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf, what)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_f32<R: Read>(reader: &mut R, what: &str) -> Result<f32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(f32::from_le_bytes(buf))
}

/// Read a `u64` that must fit a `usize` and not exceed `limit`.
pub fn read_len<R: Read>(reader: &mut R, limit: u64, what: &str) -> Result<usize> {
    let n = read_u64(reader, what)?;
    if n > limit {
        return Err(Error::Format(format!(
            "{what} = {n} exceeds the limit of {limit}"
        )));
    }
    usize::try_from(n).map_err(|_| Error::Format(format!("{what} = {n} does not fit usize")))
}

pub fn read_f32_vec<R: Read>(reader: &mut R, n: usize, what: &str) -> Result<Vec<f32>> {
    let mut bytes = vec![0u8; n.checked_mul(4).ok_or_else(|| {
        Error::Format(format!("{what}: {n} floats overflow the address space"))
    })?];
    read_exact(reader, &mut bytes, what)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn read_byte_vec<R: Read>(reader: &mut R, n: usize, what: &str) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; n];
    read_exact(reader, &mut bytes, what)?;
    Ok(bytes)
}

pub fn read_bytes<R: Read>(reader: &mut R, what: &str) -> Result<Vec<u8>> {
    let n = read_len(reader, MAX_STRING_BYTES, what)?;
    read_byte_vec(reader, n, what)
}

pub fn read_string<R: Read>(reader: &mut R, what: &str) -> Result<String> {
    let bytes = read_bytes(reader, what)?;
    String::from_utf8(bytes).map_err(|e| Error::Format(format!("{what} is not UTF-8: {e}")))
}
