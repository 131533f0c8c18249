//! amdb core: types shared by the async LMDB access layer
//!
//! This crate is store-agnostic. It defines:
//! - The error taxonomy every operation reports through
//! - Environment and database configuration
//! - The codec pipeline converting typed values to stored bytes
//! - Metadata value types (stat, info, flags)
//! - Optional metrics hooks

pub mod coder;
pub mod config;
pub mod error;
pub mod observe;
pub mod types;

pub use coder::{
    Coder, CompressedCoder, IdentityCoder, IntWidth, JsonCoder, MsgPackCoder, StringCoder,
    TextEncoding, UIntCoder,
};
pub use config::{DbOptions, EnvConfig, PutOptions};
pub use error::{AmdbError, Result};
pub use types::{EnvFlags, EnvInfo, MultiPutResult, ReaderInfo, Stat, TxnMode, Version};
