use crate::error::{MemoryError, Result};

/// Width of a single bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Word,
    Dword,
}

impl Width {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
        }
    }

    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            1 => Some(Width::Byte),
            2 => Some(Width::Word),
            4 => Some(Width::Dword),
            _ => None,
        }
    }
}

/// Bytes moved by one bus access, stored inline so the hot path never allocates.
///
/// Bytes are little-endian: `as_slice()[0]` is the byte at the lowest address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessData {
    buf: [u8; 4],
    width: Width,
}

impl AccessData {
    pub const fn zeroed(width: Width) -> Self {
        Self { buf: [0; 4], width }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let width = Width::from_len(bytes.len()).ok_or(MemoryError::WidthMismatch {
            expected: 4,
            found: bytes.len(),
        })?;
        let mut buf = [0u8; 4];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { buf, width })
    }

    pub fn from_u8(v: u8) -> Self {
        Self {
            buf: [v, 0, 0, 0],
            width: Width::Byte,
        }
    }

    pub fn from_u16(v: u16) -> Self {
        let [lo, hi] = v.to_le_bytes();
        Self {
            buf: [lo, hi, 0, 0],
            width: Width::Word,
        }
    }

    pub fn from_u32(v: u32) -> Self {
        Self {
            buf: v.to_le_bytes(),
            width: Width::Dword,
        }
    }

    #[inline]
    pub fn width(&self) -> Width {
        self.width
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.width.bytes()]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.width.bytes();
        &mut self.buf[..len]
    }

    /// Zero-extended little-endian value.
    pub fn value(&self) -> u32 {
        match self.width {
            Width::Byte => u32::from(self.buf[0]),
            Width::Word => u32::from(u16::from_le_bytes([self.buf[0], self.buf[1]])),
            Width::Dword => u32::from_le_bytes(self.buf),
        }
    }

    /// Replace the value, truncating to the access width.
    pub fn set_value(&mut self, v: u32) {
        let bytes = v.to_le_bytes();
        let len = self.width.bytes();
        self.buf[..len].copy_from_slice(&bytes[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_truncated_to_width() {
        let mut data = AccessData::zeroed(Width::Word);
        data.set_value(0x1234_5678);
        assert_eq!(data.value(), 0x5678);
        assert_eq!(data.as_slice(), &[0x78, 0x56]);
    }

    #[test]
    fn from_slice_rejects_odd_lengths() {
        assert!(AccessData::from_slice(&[1, 2, 3]).is_err());
        assert_eq!(AccessData::from_slice(&[1]).unwrap().value(), 1);
    }
}
