//! amdb prelude
//!
//! ```
//! use amdb::prelude::*;
//! ```

pub use crate::{AmdbError, Database, Environment, Result, TxnContext, TxnMode};

// Configs
pub use crate::{DbOptions, EnvConfig, PutOptions};

// Coders
pub use crate::{
    Coder, CompressedCoder, IdentityCoder, IntWidth, JsonCoder, MsgPackCoder, StringCoder,
    TextEncoding, UIntCoder,
};
