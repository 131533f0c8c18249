//! Codec pipeline
//!
//! A [`Coder`] converts between a typed value and the byte sequence stored in
//! the database. Coders compose linearly: a decorator such as
//! [`CompressedCoder`] wraps any other coder, applying its own transform after
//! the inner coder on serialize and before it on deserialize.
//!
//! Absence is never decoded. A "key not found" result reaches a coder as
//! `None` through [`Coder::decode`] and comes back out as `None` without any
//! wrapped logic running.
//!
//! # Example
//!
//! ```
//! use amdb_core::coder::{Coder, CompressedCoder, JsonCoder};
//!
//! # fn main() -> amdb_core::Result<()> {
//! let coder = CompressedCoder::with_level(JsonCoder::<Vec<u32>>::new(), 9)?;
//! let bytes = coder.serialize(&vec![1, 2, 3])?;
//! assert_eq!(coder.deserialize(&bytes)?, vec![1, 2, 3]);
//! assert_eq!(coder.decode(None)?, None);
//! # Ok(())
//! # }
//! ```

mod compressed;
mod int;
mod structured;
mod text;

use crate::error::Result;
use std::sync::Arc;

pub use compressed::{CompressedCoder, DEFAULT_COMPRESSION_LEVEL};
pub use int::{IntWidth, UIntCoder};
pub use structured::{JsonCoder, MsgPackCoder};
pub use text::{StringCoder, TextEncoding};

/// Bidirectional transform between a typed value and bytes
///
/// `deserialize(serialize(v)) == v` must hold for every value in the coder's
/// domain, including through any chain of decorators.
pub trait Coder: Send + Sync + 'static {
    type Value: Send + 'static;

    fn serialize(&self, value: &Self::Value) -> Result<Vec<u8>>;

    /// Decode bytes that are known to be present.
    ///
    /// Implementations must copy out of `bytes`; the slice may point into a
    /// transaction's memory map.
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Value>;

    /// Decode a lookup result, passing absence straight through.
    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<Self::Value>> {
        match bytes {
            Some(bytes) => self.deserialize(bytes).map(Some),
            None => Ok(None),
        }
    }
}

impl<C: Coder + ?Sized> Coder for Arc<C> {
    type Value = C::Value;

    fn serialize(&self, value: &Self::Value) -> Result<Vec<u8>> {
        (**self).serialize(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Value> {
        (**self).deserialize(bytes)
    }
}

impl<C: Coder + ?Sized> Coder for Box<C> {
    type Value = C::Value;

    fn serialize(&self, value: &Self::Value) -> Result<Vec<u8>> {
        (**self).serialize(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Value> {
        (**self).deserialize(bytes)
    }
}

/// Raw bytes, unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityCoder;

impl Coder for IdentityCoder {
    type Value = Vec<u8>;

    fn serialize(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}
