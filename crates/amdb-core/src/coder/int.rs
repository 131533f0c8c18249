use super::Coder;
use crate::error::{AmdbError, Result};

/// Supported fixed integer widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    U16,
    U32,
    U64,
}

impl IntWidth {
    /// Encoded length in bytes
    pub const fn byte_len(self) -> usize {
        match self {
            IntWidth::U16 => 2,
            IntWidth::U32 => 4,
            IntWidth::U64 => 8,
        }
    }

    pub const fn max_value(self) -> u64 {
        match self {
            IntWidth::U16 => u16::MAX as u64,
            IntWidth::U32 => u32::MAX as u64,
            IntWidth::U64 => u64::MAX,
        }
    }
}

/// Fixed-width big-endian unsigned integer
///
/// Big-endian keeps byte order equal to numeric order, so integer keys sort
/// naturally in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UIntCoder {
    width: IntWidth,
}

impl UIntCoder {
    pub const fn new(width: IntWidth) -> Self {
        Self { width }
    }

    pub const fn u16() -> Self {
        Self::new(IntWidth::U16)
    }

    pub const fn u32() -> Self {
        Self::new(IntWidth::U32)
    }

    pub const fn u64() -> Self {
        Self::new(IntWidth::U64)
    }

    pub fn width(&self) -> IntWidth {
        self.width
    }
}

impl Coder for UIntCoder {
    type Value = u64;

    fn serialize(&self, value: &u64) -> Result<Vec<u8>> {
        if *value > self.width.max_value() {
            return Err(AmdbError::Format(format!(
                "{} does not fit in {} bytes",
                value,
                self.width.byte_len()
            )));
        }
        let full = value.to_be_bytes();
        Ok(full[8 - self.width.byte_len()..].to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u64> {
        if bytes.len() != self.width.byte_len() {
            return Err(AmdbError::Format(format!(
                "expected {} bytes for {:?}, got {}",
                self.width.byte_len(),
                self.width,
                bytes.len()
            )));
        }
        let mut full = [0u8; 8];
        full[8 - bytes.len()..].copy_from_slice(bytes);
        Ok(u64::from_be_bytes(full))
    }
}
