use super::Coder;
use crate::error::{AmdbError, Result};
use std::io::Read;

/// zstd's own default level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Largest decompressed value accepted unless configured otherwise
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// Compressing decorator over any other coder
///
/// `serialize` compresses the inner coder's output; `deserialize` decompresses
/// and hands the result to the inner coder. Decorators stack linearly, so a
/// `CompressedCoder<CompressedCoder<C>>` is legal if rarely useful.
#[derive(Debug, Clone)]
pub struct CompressedCoder<C> {
    inner: C,
    level: i32,
    max_size: usize,
}

impl<C: Coder> CompressedCoder<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            level: DEFAULT_COMPRESSION_LEVEL,
            max_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }

    /// Wrap `inner` at an explicit zstd level
    pub fn with_level(inner: C, level: i32) -> Result<Self> {
        let range = zstd::compression_level_range();
        if !range.contains(&level) {
            return Err(AmdbError::Config(format!(
                "compression level {} outside {}..={}",
                level,
                range.start(),
                range.end()
            )));
        }
        Ok(Self {
            inner,
            level,
            max_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        })
    }

    /// Reject stored values that decompress past `max_size` bytes.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: Coder> Coder for CompressedCoder<C> {
    type Value = C::Value;

    fn serialize(&self, value: &C::Value) -> Result<Vec<u8>> {
        let raw = self.inner.serialize(value)?;
        zstd::bulk::compress(&raw, self.level)
            .map_err(|e| AmdbError::Format(format!("compression failed: {}", e)))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<C::Value> {
        let invalid = |e: std::io::Error| AmdbError::Format(format!("invalid compressed data: {}", e));
        let decoder = zstd::stream::read::Decoder::new(bytes).map_err(invalid)?;
        let mut raw = Vec::new();
        decoder
            .take(self.max_size as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(invalid)?;
        if raw.len() > self.max_size {
            return Err(AmdbError::Format(format!(
                "decompressed value exceeds {} bytes",
                self.max_size
            )));
        }
        self.inner.deserialize(&raw)
    }
}
