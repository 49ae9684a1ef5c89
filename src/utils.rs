//! Shape arithmetic and small I/O helpers.

use std::io::{self, Read};

use crate::error::Error;
use crate::models::DType;

/// Multiplies `a` and `b`, returning the wrapped product and whether it overflowed.
///
/// Overflow is only possible when both operands exceed 1.
#[inline]
pub fn checked_mul(a: u64, b: u64) -> (u64, bool) {
    a.overflowing_mul(b)
}

#[inline]
fn mul(a: u64, b: u64) -> Result<u64, Error> {
    match checked_mul(a, b) {
        (product, false) => Ok(product),
        (_, true) => Err(Error::Overflow { lhs: a, rhs: b }),
    }
}

/// Number of elements described by `shape`.
///
/// An empty shape is a scalar and holds one element.
pub fn num_elements(shape: &[u64]) -> Result<u64, Error> {
    shape.iter().try_fold(1u64, |acc, &dim| mul(acc, dim))
}

/// Number of payload bytes a tensor of `shape` and `dtype` occupies.
pub fn byte_size(shape: &[u64], dtype: DType) -> Result<u64, Error> {
    mul(num_elements(shape)?, dtype.byte_size() as u64)
}

/// Aligns an offset up to the given alignment boundary.
/// Returns (aligned_offset, padding_bytes).
#[inline]
pub fn align_offset_to(current_offset: u64, alignment: u64) -> (u64, u64) {
    if alignment == 0 {
        return (current_offset, 0);
    }
    let remainder = current_offset % alignment;
    if remainder == 0 {
        (current_offset, 0)
    } else {
        let padding = alignment - remainder;
        (current_offset + padding, padding)
    }
}

/// Reads until `buf` is full or the reader is exhausted.
///
/// Returns the number of bytes read; a short count means end of input.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
