//! amdb: asynchronous access to LMDB with a composable codec pipeline
//!
//! amdb runs blocking LMDB transactions on a fixed pool of worker threads
//! and hands results back to async callers:
//! - **Environment**: opens the store, schedules units of work, copy/sync/close
//! - **Database**: typed get/put/delete/pop/replace and batch operations over
//!   one LMDB database, encoded through a pair of coders
//! - **Coders**: identity, text, fixed-width integers, JSON, MessagePack and a
//!   zstd compressing decorator that wraps any of them
//!
//! # Quick Start
//!
//! ```no_run
//! use amdb::prelude::*;
//!
//! # async fn demo() -> Result<()> {
//! let env = Environment::open(EnvConfig::new("./data").with_max_dbs(8))?;
//!
//! let users = env
//!     .open_database("users", DbOptions::new())
//!     .await?
//!     .with_coders(StringCoder::new(), JsonCoder::<serde_json::Value>::new());
//!
//! users.put("alice".into(), serde_json::json!({"age": 31})).await?;
//! let alice = users.get("alice".into()).await?;
//!
//! // Read-modify-write in one transaction
//! let hits = env
//!     .run(TxnMode::Write, |txn| {
//!         let n = txn.get(b"hits")?.map(|b| b.len() as u64).unwrap_or(0);
//!         txn.put(b"hits", &vec![0u8; n as usize + 1], Default::default())?;
//!         Ok(n + 1)
//!     })
//!     .await?;
//!
//! env.close();
//! # let _ = (alice, hits);
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod env;
pub mod prelude;

pub use amdb_core::{
    coder::{
        Coder, CompressedCoder, IdentityCoder, IntWidth, JsonCoder, MsgPackCoder, StringCoder,
        TextEncoding, UIntCoder, DEFAULT_COMPRESSION_LEVEL,
    },
    config::{DbOptions, EnvConfig, PutOptions},
    error::{AmdbError, Result},
    types::{EnvFlags, EnvInfo, MultiPutResult, ReaderInfo, Stat, TxnMode, Version},
};
pub use amdb_lmdb::{TxnContext, TxnState};

pub use database::Database;
pub use env::{version, Environment};
