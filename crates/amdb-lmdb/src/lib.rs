//! LMDB plumbing for amdb
//!
//! Everything in this crate is synchronous. The async facade in `amdb` hands
//! closures to the [`WorkerPool`], and each closure runs against an
//! [`LmdbStore`] inside exactly one [`TxnContext`].
//!
//! Key pieces:
//! - Native environment open with path checks and cleanup on failure
//! - Introspection and maintenance through the raw LMDB API (info, stat,
//!   flags, copy, reader check, resize)
//! - Fixed-size FIFO worker pool with per-task withdrawal
//! - Transaction context with commit-on-success, abort-on-failure semantics

mod error;
pub mod pool;
pub mod store;
pub mod txn;

pub use error::map_store_err;
pub use pool::WorkerPool;
pub use store::{version, LmdbStore};
pub use txn::{run_unit_of_work, TxnContext, TxnState};
