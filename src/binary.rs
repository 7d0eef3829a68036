//! Bounds-checked little-endian decoding over byte slices.
//!
//! Everything the engine reads out of a compound document is a fixed-width
//! little-endian integer at a known offset; these helpers centralize the
//! bounds checks so that sector arithmetic over attacker-controlled input
//! can never index past the buffer.

use zerocopy::{FromBytes, I32, LE, U16, U32, U64};

/// Binary parsing error type
#[derive(Debug, Clone)]
pub enum BinaryError {
    /// Not enough data to read the requested range
    InsufficientData { expected: usize, available: usize },
}

impl std::fmt::Display for BinaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryError::InsufficientData {
                expected,
                available,
            } => {
                write!(
                    f,
                    "Insufficient data: expected {}, got {}",
                    expected, available
                )
            },
        }
    }
}

impl std::error::Error for BinaryError {}

/// Result type for binary operations
pub type BinaryResult<T> = Result<T, BinaryError>;

#[inline]
fn check(data: &[u8], offset: usize, width: usize) -> BinaryResult<()> {
    if offset + width > data.len() {
        return Err(BinaryError::InsufficientData {
            expected: offset + width,
            available: data.len(),
        });
    }
    Ok(())
}

/// Read a little-endian u16 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use compdoc::binary::read_u16_le;
/// let data = [0x34, 0x12, 0x78, 0x56];
/// assert_eq!(read_u16_le(&data, 0).unwrap(), 0x1234);
/// assert_eq!(read_u16_le(&data, 2).unwrap(), 0x5678);
/// ```
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> BinaryResult<u16> {
    check(data, offset, 2)?;
    Ok(U16::<LE>::read_from_bytes(&data[offset..offset + 2])
        .map(|v| v.get())
        .unwrap_or(0))
}

/// Read a little-endian u32 from a byte slice at the given offset.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> BinaryResult<u32> {
    check(data, offset, 4)?;
    Ok(U32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .unwrap_or(0))
}

/// Read a little-endian i32 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use compdoc::binary::read_i32_le;
/// let data = [0xFE, 0xFF, 0xFF, 0xFF];
/// assert_eq!(read_i32_le(&data, 0).unwrap(), -2i32);
/// ```
#[inline]
pub fn read_i32_le(data: &[u8], offset: usize) -> BinaryResult<i32> {
    check(data, offset, 4)?;
    Ok(I32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .unwrap_or(0))
}

/// Read a little-endian u64 from a byte slice at the given offset.
#[inline]
pub fn read_u64_le(data: &[u8], offset: usize) -> BinaryResult<u64> {
    check(data, offset, 8)?;
    Ok(U64::<LE>::read_from_bytes(&data[offset..offset + 8])
        .map(|v| v.get())
        .unwrap_or(0))
}

/// Decode `count` consecutive little-endian i32 values starting at `offset`.
///
/// Sector allocation tables are stored exactly this way: a run of signed
/// 32-bit sector ids filling a sector.
pub fn read_i32_array(data: &[u8], offset: usize, count: usize) -> BinaryResult<Vec<i32>> {
    check(data, offset, count * 4)?;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        out.push(read_i32_le(data, offset + i * 4)?);
    }
    Ok(out)
}

/// Borrow `len` bytes starting at `offset`, or fail if out of range.
#[inline]
pub fn slice(data: &[u8], offset: usize, len: usize) -> BinaryResult<&[u8]> {
    check(data, offset, len)?;
    Ok(&data[offset..offset + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_little_endian() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u16_le(&data, 0).unwrap(), 0x0201);
        assert_eq!(read_u32_le(&data, 0).unwrap(), 0x0403_0201);
        assert_eq!(read_u64_le(&data, 0).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn out_of_range_is_an_error() {
        let data = [0u8; 4];
        assert!(read_u32_le(&data, 1).is_err());
        assert!(read_i32_array(&data, 0, 2).is_err());
        assert!(slice(&data, 2, 4).is_err());
    }

    #[test]
    fn sentinel_values_decode_signed() {
        let data = [0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let v = read_i32_array(&data, 0, 2).unwrap();
        assert_eq!(v, vec![-2, -1]);
    }
}
