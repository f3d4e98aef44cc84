//! Bounds-checked access to one captured message.

use std::fmt;

/// Byte order for multi-byte reads. Both NFS and PCP are big-endian on the
/// wire; little-endian shows up in legacy vendor file handles and in the
/// PCP label length bug workaround.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Errors that abort decoding of the current message or field.
///
/// Only conditions that make further linear decoding impossible are errors;
/// everything softer (protocol violations, unknown tags, guessed encodings)
/// is reported through [`crate::tree::FieldSink::flag`] and decoding
/// continues at a resynchronized offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DissectError {
    /// A read of `needed` bytes at `offset` runs past the captured length.
    OutOfBounds {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

impl fmt::Display for DissectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DissectError::OutOfBounds {
                offset,
                needed,
                available,
            } => write!(
                f,
                "read of {} bytes at offset {} exceeds captured length {}",
                needed, offset, available
            ),
        }
    }
}

impl std::error::Error for DissectError {}

pub type DissectResult<T> = Result<T, DissectError>;

/// Number of fill bytes after `length` bytes of opaque data, per the
/// 4-byte alignment rule shared by XDR and the PCP PDU format.
#[inline]
pub fn pad4(length: usize) -> usize {
    (4 - (length % 4)) % 4
}

/// `length` rounded up to the next 4-byte boundary.
#[inline]
pub fn padded4(length: usize) -> usize {
    length + pad4(length)
}

/// An immutable view of one reassembled protocol message.
///
/// All reads are random-access and bounds-checked; nothing here advances a
/// cursor. Decode routines carry their own offset and return the advanced
/// value.
#[derive(Debug, Clone, Copy)]
pub struct DecodeBuffer<'a> {
    data: &'a [u8],
}

impl<'a> DecodeBuffer<'a> {
    pub fn new(data: &'a [u8]) -> DecodeBuffer<'a> {
        DecodeBuffer { data }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }

    /// Remaining bytes from `offset` to the end of the capture.
    #[inline]
    pub fn remaining(&self, offset: usize) -> usize {
        self.data.len().saturating_sub(offset)
    }

    /// A `length`-byte window at `offset`, or `OutOfBounds`.
    pub fn window(&self, offset: usize, length: usize) -> DissectResult<&'a [u8]> {
        match self.data.get(offset..offset.checked_add(length).unwrap_or(usize::MAX)) {
            Some(w) => Ok(w),
            None => Err(DissectError::OutOfBounds {
                offset,
                needed: length,
                available: self.data.len(),
            }),
        }
    }

    pub fn u8_at(&self, offset: usize) -> DissectResult<u8> {
        let w = self.window(offset, 1)?;
        Ok(w[0])
    }

    pub fn u16_at(&self, offset: usize, order: ByteOrder) -> DissectResult<u16> {
        let w = self.window(offset, 2)?;
        let b = [w[0], w[1]];
        Ok(match order {
            ByteOrder::Big => u16::from_be_bytes(b),
            ByteOrder::Little => u16::from_le_bytes(b),
        })
    }

    /// 3-byte unsigned read, used by the PCP value-block length field.
    pub fn u24_at(&self, offset: usize, order: ByteOrder) -> DissectResult<u32> {
        let w = self.window(offset, 3)?;
        Ok(match order {
            ByteOrder::Big => ((w[0] as u32) << 16) | ((w[1] as u32) << 8) | w[2] as u32,
            ByteOrder::Little => ((w[2] as u32) << 16) | ((w[1] as u32) << 8) | w[0] as u32,
        })
    }

    pub fn u32_at(&self, offset: usize, order: ByteOrder) -> DissectResult<u32> {
        let w = self.window(offset, 4)?;
        let b = [w[0], w[1], w[2], w[3]];
        Ok(match order {
            ByteOrder::Big => u32::from_be_bytes(b),
            ByteOrder::Little => u32::from_le_bytes(b),
        })
    }

    pub fn i32_at(&self, offset: usize, order: ByteOrder) -> DissectResult<i32> {
        Ok(self.u32_at(offset, order)? as i32)
    }

    pub fn u64_at(&self, offset: usize, order: ByteOrder) -> DissectResult<u64> {
        let w = self.window(offset, 8)?;
        let b = [w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7]];
        Ok(match order {
            ByteOrder::Big => u64::from_be_bytes(b),
            ByteOrder::Little => u64::from_le_bytes(b),
        })
    }

    pub fn i64_at(&self, offset: usize, order: ByteOrder) -> DissectResult<i64> {
        Ok(self.u64_at(offset, order)? as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_law() {
        for length in 0..=1000usize {
            assert_eq!(pad4(length), (4 - (length % 4)) % 4);
            assert_eq!(padded4(length) % 4, 0);
            assert!(padded4(length) - length < 4);
        }
    }

    #[test]
    fn bounded_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        let buf = DecodeBuffer::new(&data);
        assert_eq!(buf.u32_at(0, ByteOrder::Big), Ok(0x01020304));
        assert_eq!(buf.u32_at(1, ByteOrder::Little), Ok(0x05040302));
        assert_eq!(buf.u24_at(2, ByteOrder::Big), Ok(0x030405));
        assert_eq!(
            buf.u32_at(2, ByteOrder::Big),
            Err(DissectError::OutOfBounds {
                offset: 2,
                needed: 4,
                available: 5
            })
        );
        assert!(buf.u64_at(0, ByteOrder::Big).is_err());
        assert_eq!(buf.remaining(3), 2);
        assert_eq!(buf.remaining(100), 0);
    }

    #[test]
    fn window_overflow_guard() {
        let data = [0u8; 4];
        let buf = DecodeBuffer::new(&data);
        assert!(buf.window(usize::MAX, 8).is_err());
        assert!(buf.window(2, usize::MAX).is_err());
    }
}
