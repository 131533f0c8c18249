use crate::error::{AmdbError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for opening an environment
///
/// Everything except `worker_threads` is passed through to the store when the
/// environment is opened. Defaults follow LMDB's own defaults where it has
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Directory (or file, when `subdir` is false) holding the store
    pub path: PathBuf,

    /// Maximum size of the memory map in bytes
    /// Default: 10 MiB
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Maximum number of named sub-databases
    /// Default: 0 (only the default database is usable)
    #[serde(default)]
    pub max_dbs: u32,

    /// Maximum number of concurrent read transactions
    /// Default: 126
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,

    /// Flush system buffers to disk on commit
    #[serde(default = "default_true")]
    pub sync: bool,

    /// Flush the meta page on commit
    #[serde(default = "default_true")]
    pub metasync: bool,

    /// Use asynchronous flushes when `writemap` is enabled
    #[serde(default)]
    pub map_async: bool,

    /// Zero-initialize malloc'd pages before writing them to disk
    #[serde(default = "default_true")]
    pub meminit: bool,

    /// Let the OS read ahead on the data file
    #[serde(default = "default_true")]
    pub readahead: bool,

    /// Use a writeable memory map
    #[serde(default)]
    pub writemap: bool,

    /// Use the store's lock file. Disabling it leaves concurrency entirely to
    /// the caller.
    #[serde(default = "default_true")]
    pub lock: bool,

    /// `path` is a directory containing `data.mdb` and `lock.mdb`. When false,
    /// `path` is the data file itself and the lock file is `path-lock`.
    #[serde(default = "default_true")]
    pub subdir: bool,

    /// Unix permission bits for created files and directories
    /// Default: 0o755
    #[serde(default = "default_mode")]
    pub mode: u32,

    /// Open the environment read-only; write units of work are rejected
    /// before they are scheduled.
    #[serde(default)]
    pub readonly: bool,

    /// Create the store directory if it is missing
    #[serde(default = "default_true")]
    pub create: bool,

    /// Number of worker threads executing units of work
    ///
    /// Bounds the number of concurrently open transactions. Mixed read/write
    /// workloads need at least 2 so a queued write cannot starve reads.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_map_size() -> usize {
    10 * 1024 * 1024 // 10MiB
}

fn default_max_readers() -> u32 {
    126
}

fn default_mode() -> u32 {
    0o755
}

fn default_true() -> bool {
    true
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(2)
}

impl EnvConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size: default_map_size(),
            max_dbs: 0,
            max_readers: default_max_readers(),
            sync: true,
            metasync: true,
            map_async: false,
            meminit: true,
            readahead: true,
            writemap: false,
            lock: true,
            subdir: true,
            mode: default_mode(),
            readonly: false,
            create: true,
            worker_threads: default_worker_threads(),
        }
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_max_dbs(mut self, max_dbs: u32) -> Self {
        self.max_dbs = max_dbs;
        self
    }

    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_metasync(mut self, metasync: bool) -> Self {
        self.metasync = metasync;
        self
    }

    pub fn with_map_async(mut self, map_async: bool) -> Self {
        self.map_async = map_async;
        self
    }

    pub fn with_meminit(mut self, meminit: bool) -> Self {
        self.meminit = meminit;
        self
    }

    pub fn with_readahead(mut self, readahead: bool) -> Self {
        self.readahead = readahead;
        self
    }

    pub fn with_writemap(mut self, writemap: bool) -> Self {
        self.writemap = writemap;
        self
    }

    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_subdir(mut self, subdir: bool) -> Self {
        self.subdir = subdir;
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Check the arguments that can be rejected without touching the disk
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(AmdbError::Config("path must not be empty".into()));
        }
        if self.map_size == 0 {
            return Err(AmdbError::Config("map_size must be positive".into()));
        }
        if self.max_readers == 0 {
            return Err(AmdbError::Config("max_readers must be positive".into()));
        }
        if self.worker_threads == 0 {
            return Err(AmdbError::Config("worker_threads must be positive".into()));
        }
        if self.mode & !0o777 != 0 {
            return Err(AmdbError::Config(format!(
                "invalid permission bits {:o}",
                self.mode
            )));
        }
        Ok(())
    }
}
