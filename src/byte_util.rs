//! Fixed-width little-endian integer packing over pre-sized byte buffers.

use byteorder::{ByteOrder, LE};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("byte range {offset}..{end} is outside a buffer of {len} bytes")]
pub struct OutOfBounds {
    pub offset: usize,
    pub end: usize,
    pub len: usize,
}

fn range(len: usize, offset: usize, bytes: usize) -> Result<std::ops::Range<usize>, OutOfBounds> {
    match offset.checked_add(bytes) {
        Some(end) if end <= len => Ok(offset..end),
        end => Err(OutOfBounds {
            offset,
            end: end.unwrap_or(usize::MAX),
            len,
        }),
    }
}

/// Writes the low `bytes` bytes (1..=4) of `v` at `offset`. The buffer never grows.
pub fn write(b: &mut [u8], offset: usize, v: u32, bytes: usize) -> Result<(), OutOfBounds> {
    debug_assert!((1..=4).contains(&bytes));
    let r = range(b.len(), offset, bytes)?;
    LE::write_uint(&mut b[r], v as u64, bytes);
    Ok(())
}

pub fn write_int_long(b: &mut [u8], offset: usize, v: u32) -> Result<(), OutOfBounds> {
    let r = range(b.len(), offset, 4)?;
    LE::write_u32(&mut b[r], v);
    Ok(())
}

/// Reads a `bytes`-wide (1..=4) unsigned little-endian integer at `offset`.
pub fn get_uint(b: &[u8], offset: usize, bytes: usize) -> Result<u32, OutOfBounds> {
    debug_assert!((1..=4).contains(&bytes));
    let r = range(b.len(), offset, bytes)?;
    Ok(LE::read_uint(&b[r], bytes) as u32)
}

pub fn get_int_long(b: &[u8], offset: usize) -> Result<u32, OutOfBounds> {
    get_uint(b, offset, 4)
}

pub fn get_int3(b: &[u8], offset: usize) -> Result<u32, OutOfBounds> {
    get_uint(b, offset, 3)
}

pub fn get_int2(b: &[u8], offset: usize) -> Result<u32, OutOfBounds> {
    get_uint(b, offset, 2)
}

pub fn get_int1(b: &[u8], offset: usize) -> Result<u32, OutOfBounds> {
    get_uint(b, offset, 1)
}

/// Borrowed sub-slice `[offset, offset + len)` with the same bounds rules.
pub fn slice(b: &[u8], offset: usize, len: usize) -> Result<&[u8], OutOfBounds> {
    let r = range(b.len(), offset, len)?;
    Ok(&b[r])
}
