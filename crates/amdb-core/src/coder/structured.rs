use super::{Coder, StringCoder, TextEncoding};
use crate::error::{AmdbError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

/// Structured values as JSON text, layered on [`StringCoder`]
///
/// Defaults to `serde_json::Value` so arbitrary objects, lists and mappings
/// can be stored without declaring a type.
pub struct JsonCoder<T = serde_json::Value> {
    text: StringCoder,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCoder<T> {
    pub fn new() -> Self {
        Self::with_encoding(TextEncoding::Utf8)
    }

    pub fn with_encoding(encoding: TextEncoding) -> Self {
        Self {
            text: StringCoder::with_encoding(encoding),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCoder<T> {
    fn clone(&self) -> Self {
        Self {
            text: self.text,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for JsonCoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCoder")
            .field("encoding", &self.text.encoding())
            .finish()
    }
}

impl<T> Coder for JsonCoder<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        let json = serde_json::to_string(value).map_err(|e| AmdbError::Format(e.to_string()))?;
        self.text.encode_str(&json)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        let json = self.text.deserialize(bytes)?;
        serde_json::from_str(&json).map_err(|e| AmdbError::Format(e.to_string()))
    }
}

/// Structured values as MessagePack
///
/// More compact than [`JsonCoder`]; structs are written with field names so
/// records survive field reordering.
pub struct MsgPackCoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> MsgPackCoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for MsgPackCoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MsgPackCoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for MsgPackCoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MsgPackCoder")
    }
}

impl<T> Coder for MsgPackCoder<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| AmdbError::Format(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| AmdbError::Format(e.to_string()))
    }
}
