use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AmdbError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid open arguments, raised before anything is scheduled.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Map full, too many databases, too many readers and friends.
    /// Never retried by this layer.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Read-only violation: {0}")]
    ReadOnly(String),

    #[error("Environment is closed")]
    Closed,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed bytes for a given coder.
    #[error("Format error: {0}")]
    Format(String),

    #[error("Transaction already finished")]
    TxnFinished,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl AmdbError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, AmdbError::Capacity(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, AmdbError::Closed)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AmdbError::NotFound(_))
    }

    pub fn is_format(&self) -> bool {
        matches!(self, AmdbError::Format(_))
    }
}

pub type Result<T> = std::result::Result<T, AmdbError>;

// Units of work may raise their own errors. Anything that implements
// `std::error::Error + Send + Sync + 'static` converts through the
// `anyhow::Error` variant:
//
//     db.run(TxnMode::Write, |txn| {
//         let raw = txn.get(b"counter")?;
//         let n: u64 = parse(raw).map_err(anyhow::Error::from)?;
//         ...
//     })
//
// The original error is preserved and surfaces from the awaited future.
