//! Plain value types returned by the environment and database handles.

use serde::{Deserialize, Serialize};

/// Whether a unit of work runs in a read-only or read-write transaction.
///
/// Decided when the transaction is created and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnMode {
    Read,
    Write,
}

impl TxnMode {
    pub fn is_write(self) -> bool {
        matches!(self, TxnMode::Write)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxnMode::Read => "read",
            TxnMode::Write => "write",
        }
    }
}

/// B-tree statistics for the environment or a single database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub page_size: u32,
    pub depth: u32,
    pub branch_pages: usize,
    pub leaf_pages: usize,
    pub overflow_pages: usize,
    pub entries: usize,
}

/// Environment-wide information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvInfo {
    /// Address of the memory map, if it is fixed
    pub map_addr: usize,
    pub map_size: usize,
    pub last_pgno: usize,
    pub last_txnid: usize,
    pub max_readers: u32,
    pub num_readers: u32,
}

/// Flags the environment was actually opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvFlags {
    pub subdir: bool,
    pub readonly: bool,
    pub metasync: bool,
    pub sync: bool,
    pub map_async: bool,
    pub readahead: bool,
    pub writemap: bool,
    pub meminit: bool,
    pub lock: bool,
}

/// Reader lock table summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    pub max_readers: u32,
    pub num_readers: u32,
}

/// Outcome of a batched put
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiPutResult {
    /// Items handed to the cursor
    pub consumed: usize,
    /// Items actually written
    pub added: usize,
}

/// Linked LMDB library version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn as_tuple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
