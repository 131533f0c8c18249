//! Asynchronous environment facade
//!
//! An [`Environment`] owns the native LMDB handle and a fixed worker pool.
//! Every store call is shipped to the pool as a closure and awaited through a
//! oneshot channel, so async callers never block on LMDB.

use crate::database::Database;
use amdb_core::{
    observe, AmdbError, DbOptions, EnvConfig, EnvFlags, EnvInfo, ReaderInfo, Result, Stat,
    TxnMode, Version,
};
use amdb_lmdb::{LmdbStore, TxnContext, WorkerPool};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const WORKER_NAME: &str = "amdb-worker";

/// State shared by an environment and every database handle opened from it
pub(crate) struct EnvShared {
    /// `None` once closed. Running work holds its own clone, so the native
    /// handle outlives `close()` until that work finishes.
    store: RwLock<Option<Arc<LmdbStore>>>,
    pool: WorkerPool,
    /// Held shared by every unit of work and exclusively by map resizes.
    gate: RwLock<()>,
    /// Invalidation flag per open database slot, shared by every handle on
    /// it. LMDB reuses the slot of a removed database, so the flag is set
    /// and forgotten before anything else can open that slot.
    handles: RwLock<HashMap<u32, Arc<AtomicBool>>>,
    config: EnvConfig,
}

impl EnvShared {
    pub(crate) fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> Result<Arc<LmdbStore>> {
        self.store.read().clone().ok_or(AmdbError::Closed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.store.read().is_none()
    }

    fn close(&self) {
        let taken = self.store.write().take();
        if taken.is_some() {
            self.pool.shutdown();
            info!(path = %self.config.path.display(), "environment closed");
        }
    }

    /// Reject writes against a read-only environment before scheduling.
    pub(crate) fn check_mode(&self, mode: TxnMode) -> Result<()> {
        if mode.is_write() && self.config.readonly {
            return Err(AmdbError::ReadOnly(format!(
                "environment at {} was opened read-only",
                self.config.path.display()
            )));
        }
        Ok(())
    }

    /// Open a database on a worker and hand out the flag shared by every
    /// handle on its slot.
    fn open_handle(
        &self,
        store: &LmdbStore,
        name: &str,
        options: &DbOptions,
    ) -> Result<(lmdb::Database, Arc<AtomicBool>)> {
        let mut handles = self.handles.write();
        let db = store.open_db(Some(name), options)?;
        let flag = handles
            .entry(db.dbi())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)));
        Ok((db, Arc::clone(flag)))
    }

    /// Run `work` unless the handle's database was removed. Removal waits
    /// until `work` returns.
    pub(crate) fn with_live_handle<T>(
        &self,
        dropped: &AtomicBool,
        name: Option<&str>,
        work: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let _handles = self.handles.read();
        ensure_live(dropped, name)?;
        work()
    }

    /// Remove the database behind `dbi` and invalidate every handle on it
    /// before its slot can be reused.
    pub(crate) fn retire_handle(
        &self,
        dbi: u32,
        dropped: &AtomicBool,
        name: Option<&str>,
        remove: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        let mut handles = self.handles.write();
        ensure_live(dropped, name)?;
        remove()?;
        dropped.store(true, Ordering::Release);
        handles.remove(&dbi);
        Ok(())
    }

    /// Run `work` against the store on the pool and await its result.
    ///
    /// A closed environment rejects before and after queueing: work still in
    /// the queue when `close()` runs never starts.
    pub(crate) async fn schedule<T, F>(self: &Arc<Self>, exclusive: bool, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbStore) -> Result<T> + Send + 'static,
    {
        if self.is_closed() {
            return Err(AmdbError::Closed);
        }
        let shared = Arc::clone(self);
        let rx = self.pool.submit(move || {
            if exclusive {
                let _gate = shared.gate.write();
                let store = shared.store()?;
                work(&store)
            } else {
                let _gate = shared.gate.read();
                let store = shared.store()?;
                work(&store)
            }
        })?;
        // A dropped sender means the queue was discarded by close().
        rx.await.map_err(|_| AmdbError::Closed)?
    }

    /// Schedule a maintenance call and record its outcome.
    async fn maintenance<T, F>(self: &Arc<Self>, op: &'static str, exclusive: bool, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbStore) -> Result<T> + Send + 'static,
    {
        debug!(op, "scheduling maintenance");
        let result = self.schedule(exclusive, work).await;
        observe::record_maintenance(op, result.is_ok());
        result
    }
}

/// An open LMDB environment
///
/// Cheap to share behind an `Arc`; database handles keep the underlying state
/// alive on their own.
///
/// # Example
///
/// ```no_run
/// use amdb::prelude::*;
///
/// # async fn demo() -> Result<()> {
/// let env = Environment::open(EnvConfig::new("./data").with_max_dbs(4))?;
/// let db = env.default_database();
/// db.put(b"a".to_vec(), b"b".to_vec()).await?;
/// assert_eq!(db.get(b"a".to_vec()).await?, Some(b"b".to_vec()));
/// env.close();
/// # Ok(())
/// # }
/// ```
pub struct Environment {
    shared: Arc<EnvShared>,
    default_db: Database,
}

impl Environment {
    /// Open the environment synchronously.
    ///
    /// Any failure is a [`AmdbError::Config`] and leaves nothing new on disk.
    pub fn open(config: EnvConfig) -> Result<Self> {
        let store = LmdbStore::open(&config)?;
        let main = store.open_db(None, &DbOptions::new().with_create(false))?;
        let pool = WorkerPool::new(WORKER_NAME, config.worker_threads)
            .map_err(|e| AmdbError::Config(format!("cannot start worker pool: {}", e)))?;

        info!(
            path = %config.path.display(),
            workers = config.worker_threads,
            readonly = config.readonly,
            "environment opened"
        );

        let main_flag = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(EnvShared {
            store: RwLock::new(Some(Arc::new(store))),
            pool,
            gate: RwLock::new(()),
            handles: RwLock::new(HashMap::from([(main.dbi(), Arc::clone(&main_flag))])),
            config,
        });
        let default_db = Database::new(Arc::clone(&shared), main, None, main_flag);
        Ok(Self { shared, default_db })
    }

    /// Open with default settings at `path`
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(EnvConfig::new(path))
    }

    pub fn config(&self) -> &EnvConfig {
        self.shared.config()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Close the environment. Idempotent.
    ///
    /// Work already running finishes; queued and future work is rejected
    /// with [`AmdbError::Closed`].
    pub fn close(&self) {
        self.shared.close();
    }

    /// Handle on the unnamed database, created with the environment
    pub fn default_database(&self) -> &Database {
        &self.default_db
    }

    /// Open or create a named database.
    ///
    /// Requires `max_dbs > 0`. A missing database with `create` off fails
    /// with [`AmdbError::NotFound`].
    pub async fn open_database(&self, name: &str, options: DbOptions) -> Result<Database> {
        if self.shared.is_closed() {
            return Err(AmdbError::Closed);
        }
        if options.create {
            self.shared.check_mode(TxnMode::Write)?;
        }
        let owned = name.to_string();
        let shared = Arc::clone(&self.shared);
        let (db, dropped) = self
            .shared
            .schedule(false, move |store| shared.open_handle(store, &owned, &options))
            .await?;
        debug!(name, "database opened");
        Ok(Database::new(
            Arc::clone(&self.shared),
            db,
            Some(Arc::from(name)),
            dropped,
        ))
    }

    /// Run a unit of work against the default database.
    pub async fn run<T, F>(&self, mode: TxnMode, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut TxnContext<'_>) -> Result<T> + Send + 'static,
    {
        self.default_db.run(mode, work).await
    }

    /// Consistent hot copy into the directory (or file, without subdir) at
    /// `dest`. With `compact`, free pages are omitted.
    pub async fn copy(&self, dest: impl AsRef<Path>, compact: bool) -> Result<()> {
        let dest = dest.as_ref().to_path_buf();
        let shown = dest.display().to_string();
        self.shared
            .maintenance("copy", false, move |store| store.copy_to(&dest, compact))
            .await?;
        info!(dest = %shown, compact, "environment copied");
        Ok(())
    }

    /// Hot copy into an open, writable descriptor. The caller keeps
    /// ownership of `fd`.
    pub async fn copy_to_fd(&self, fd: RawFd, compact: bool) -> Result<()> {
        self.shared
            .maintenance("copyfd", false, move |store| store.copy_to_fd(fd, compact))
            .await?;
        info!(fd, compact, "environment copied to descriptor");
        Ok(())
    }

    /// Flush to disk; `force` flushes even when sync is disabled.
    pub async fn sync(&self, force: bool) -> Result<()> {
        self.shared
            .maintenance("sync", false, move |store| store.sync(force))
            .await
    }

    /// Resize the memory map while no other unit of work is active.
    pub async fn set_map_size(&self, size: usize) -> Result<()> {
        self.shared
            .maintenance("set_map_size", true, move |store| {
                // The exclusive gate guarantees no transaction is open.
                unsafe { store.set_map_size(size) }
            })
            .await
    }

    pub fn info(&self) -> Result<EnvInfo> {
        self.shared.store()?.info()
    }

    pub fn flags(&self) -> Result<EnvFlags> {
        self.shared.store()?.flags()
    }

    /// Statistics for the main database
    pub fn stat(&self) -> Result<Stat> {
        self.shared.store()?.stat()
    }

    pub fn path(&self) -> Result<PathBuf> {
        self.shared.store()?.path()
    }

    pub fn max_key_size(&self) -> Result<usize> {
        Ok(self.shared.store()?.max_key_size())
    }

    pub fn max_readers(&self) -> Result<u32> {
        self.shared.store()?.max_readers()
    }

    pub fn readers(&self) -> Result<ReaderInfo> {
        self.shared.store()?.readers()
    }

    /// Release reader slots held by dead processes
    pub fn reader_check(&self) -> Result<usize> {
        self.shared.store()?.reader_check()
    }
}

pub(crate) fn ensure_live(dropped: &AtomicBool, name: Option<&str>) -> Result<()> {
    if dropped.load(Ordering::Acquire) {
        return Err(AmdbError::NotFound(format!(
            "database {:?} was dropped",
            name.unwrap_or_default()
        )));
    }
    Ok(())
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.shared.config.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Version of the linked LMDB library
pub fn version() -> Version {
    amdb_lmdb::version()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_env() -> (Environment, TempDir) {
        let temp = TempDir::new().unwrap();
        let env = Environment::open(EnvConfig::new(temp.path().join("env")).with_max_dbs(4))
            .unwrap();
        (env, temp)
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (env, _temp) = create_test_env();
        assert!(!env.is_closed());
        env.close();
        env.close();
        assert!(env.is_closed());
        assert!(env.info().unwrap_err().is_closed());
        assert!(env.sync(false).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_run_on_default_database() {
        let (env, _temp) = create_test_env();
        env.run(TxnMode::Write, |txn| {
            txn.put(b"k", b"v", Default::default())?;
            Ok(())
        })
        .await
        .unwrap();
        let value = env
            .run(TxnMode::Read, |txn| txn.get(b"k"))
            .await
            .unwrap();
        assert_eq!(value, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_set_map_size_grows_map() {
        let (env, _temp) = create_test_env();
        let before = env.info().unwrap().map_size;
        env.set_map_size(before * 2).await.unwrap();
        assert_eq!(env.info().unwrap().map_size, before * 2);
    }

    #[test]
    fn test_debug_output() {
        let (env, _temp) = create_test_env();
        let shown = format!("{:?}", env);
        assert!(shown.contains("closed: false"));
    }
}
