//! Native environment handle
//!
//! [`LmdbStore`] owns one `lmdb::Environment`. Opening validates the path
//! layout up front and removes anything it created if LMDB then refuses the
//! files, so a failed open leaves the filesystem as it found it.
//!
//! The safe `lmdb` API does not cover introspection, hot copies or resizing;
//! those go through `lmdb-sys` against the raw environment pointer.

use crate::error::{check_rc, map_store_err};
use amdb_core::{
    AmdbError, DbOptions, EnvConfig, EnvFlags, EnvInfo, ReaderInfo, Result, Stat, Version,
};
use libc::{c_char, c_int, c_uint};
use lmdb::{DatabaseFlags, Environment, EnvironmentFlags};
use std::ffi::{CStr, CString};
use std::fs::DirBuilder;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// Compact free pages while copying. Not exported by lmdb-sys 0.8.
const MDB_CP_COMPACT: c_uint = 0x01;

const LOCK_SUFFIX: &str = "-lock";
const DATA_FILE: &str = "data.mdb";
const LOCK_FILE: &str = "lock.mdb";

/// An open LMDB environment
pub struct LmdbStore {
    env: Environment,
    path: PathBuf,
    readonly: bool,
}

/// Filesystem entries created while preparing an open, removed again if the
/// open fails.
#[derive(Default)]
struct Created {
    dir: Option<PathBuf>,
    files: Vec<PathBuf>,
}

impl Created {
    fn cleanup(self) {
        for file in &self.files {
            let _ = std::fs::remove_file(file);
        }
        if let Some(dir) = &self.dir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

impl LmdbStore {
    /// Open (and optionally create) the environment described by `cfg`.
    ///
    /// Every failure here is reported as [`AmdbError::Config`].
    pub fn open(cfg: &EnvConfig) -> Result<Self> {
        cfg.validate()?;

        let created = prepare_path(cfg)?;

        let mut builder = Environment::new();
        builder
            .set_flags(env_flags(cfg))
            .set_max_readers(cfg.max_readers as c_uint)
            .set_max_dbs(cfg.max_dbs as c_uint)
            .set_map_size(cfg.map_size);

        match builder.open_with_permissions(&cfg.path, cfg.mode as libc::mode_t) {
            Ok(env) => {
                tracing::debug!(
                    path = %cfg.path.display(),
                    map_size = cfg.map_size,
                    readonly = cfg.readonly,
                    "LMDB environment opened"
                );
                Ok(Self {
                    env,
                    path: cfg.path.clone(),
                    readonly: cfg.readonly,
                })
            }
            Err(e) => {
                created.cleanup();
                Err(AmdbError::Config(format!(
                    "cannot open environment at {}: {}",
                    cfg.path.display(),
                    e
                )))
            }
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Path the environment was opened with
    pub fn config_path(&self) -> &Path {
        &self.path
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Open a database handle, the unnamed one when `name` is `None`.
    ///
    /// Must not be called from a thread that holds an open transaction.
    pub fn open_db(&self, name: Option<&str>, opts: &DbOptions) -> Result<lmdb::Database> {
        if !opts.create {
            return self.env.open_db(name).map_err(|e| match e {
                lmdb::Error::NotFound => AmdbError::NotFound(format!(
                    "database {:?} does not exist",
                    name.unwrap_or_default()
                )),
                other => map_store_err(other),
            });
        }
        if self.readonly {
            return Err(AmdbError::ReadOnly(
                "cannot create a database in a read-only environment".into(),
            ));
        }
        self.env
            .create_db(name, db_flags(opts))
            .map_err(map_store_err)
    }

    pub fn info(&self) -> Result<EnvInfo> {
        let mut raw: lmdb_sys::MDB_envinfo = unsafe { std::mem::zeroed() };
        check_rc(unsafe { lmdb_sys::mdb_env_info(self.env.env(), &mut raw) })?;
        Ok(EnvInfo {
            map_addr: raw.me_mapaddr as usize,
            map_size: raw.me_mapsize,
            last_pgno: raw.me_last_pgno,
            last_txnid: raw.me_last_txnid,
            max_readers: raw.me_maxreaders,
            num_readers: raw.me_numreaders,
        })
    }

    /// Statistics for the main (unnamed) database
    pub fn stat(&self) -> Result<Stat> {
        let mut raw: lmdb_sys::MDB_stat = unsafe { std::mem::zeroed() };
        check_rc(unsafe { lmdb_sys::mdb_env_stat(self.env.env(), &mut raw) })?;
        Ok(stat_from_raw(&raw))
    }

    pub fn flags(&self) -> Result<EnvFlags> {
        let mut raw: c_uint = 0;
        check_rc(unsafe { lmdb_sys::mdb_env_get_flags(self.env.env(), &mut raw) })?;
        let flags = EnvironmentFlags::from_bits_truncate(raw);
        Ok(EnvFlags {
            subdir: !flags.contains(EnvironmentFlags::NO_SUB_DIR),
            readonly: flags.contains(EnvironmentFlags::READ_ONLY),
            metasync: !flags.contains(EnvironmentFlags::NO_META_SYNC),
            sync: !flags.contains(EnvironmentFlags::NO_SYNC),
            map_async: flags.contains(EnvironmentFlags::MAP_ASYNC),
            readahead: !flags.contains(EnvironmentFlags::NO_READAHEAD),
            writemap: flags.contains(EnvironmentFlags::WRITE_MAP),
            meminit: !flags.contains(EnvironmentFlags::NO_MEM_INIT),
            lock: !flags.contains(EnvironmentFlags::NO_LOCK),
        })
    }

    /// Path as LMDB reports it
    pub fn path(&self) -> Result<PathBuf> {
        let mut raw: *const c_char = std::ptr::null();
        check_rc(unsafe { lmdb_sys::mdb_env_get_path(self.env.env(), &mut raw) })?;
        if raw.is_null() {
            return Ok(self.path.clone());
        }
        let bytes = unsafe { CStr::from_ptr(raw) }.to_bytes();
        Ok(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }

    pub fn max_key_size(&self) -> usize {
        let size: c_int = unsafe { lmdb_sys::mdb_env_get_maxkeysize(self.env.env()) };
        size.max(0) as usize
    }

    pub fn max_readers(&self) -> Result<u32> {
        let mut raw: c_uint = 0;
        check_rc(unsafe { lmdb_sys::mdb_env_get_maxreaders(self.env.env(), &mut raw) })?;
        Ok(raw)
    }

    /// Reader slot usage from the environment info block
    pub fn readers(&self) -> Result<ReaderInfo> {
        let info = self.info()?;
        Ok(ReaderInfo {
            max_readers: info.max_readers,
            num_readers: info.num_readers,
        })
    }

    /// Clear reader slots left behind by dead processes; returns how many.
    pub fn reader_check(&self) -> Result<usize> {
        let mut dead: c_int = 0;
        check_rc(unsafe { lmdb_sys::mdb_reader_check(self.env.env(), &mut dead) })?;
        Ok(dead.max(0) as usize)
    }

    /// Consistent hot copy into `dest`, which must be an existing empty
    /// directory (or a file path when the environment has no subdir).
    pub fn copy_to(&self, dest: &Path, compact: bool) -> Result<()> {
        let c_path = CString::new(dest.as_os_str().as_bytes())
            .map_err(|_| AmdbError::Config(format!("path contains NUL: {}", dest.display())))?;
        let flags = if compact { MDB_CP_COMPACT } else { 0 };
        check_rc(unsafe { lmdb_sys::mdb_env_copy2(self.env.env(), c_path.as_ptr(), flags) })
    }

    /// Hot copy into an already open, writable file descriptor.
    pub fn copy_to_fd(&self, fd: RawFd, compact: bool) -> Result<()> {
        let flags = if compact { MDB_CP_COMPACT } else { 0 };
        check_rc(unsafe { lmdb_sys::mdb_env_copyfd2(self.env.env(), fd, flags) })
    }

    pub fn sync(&self, force: bool) -> Result<()> {
        self.env.sync(force).map_err(map_store_err)
    }

    /// Grow (or shrink) the memory map.
    ///
    /// # Safety
    ///
    /// No transaction may be active on this environment anywhere in the
    /// process while the call runs.
    pub unsafe fn set_map_size(&self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(AmdbError::Config("map size must be non-zero".into()));
        }
        check_rc(lmdb_sys::mdb_env_set_mapsize(self.env.env(), size))?;
        tracing::info!(path = %self.path.display(), size, "map size changed");
        Ok(())
    }
}

/// Version of the linked LMDB library
pub fn version() -> Version {
    let (mut major, mut minor, mut patch): (c_int, c_int, c_int) = (0, 0, 0);
    unsafe {
        lmdb_sys::mdb_version(&mut major, &mut minor, &mut patch);
    }
    Version {
        major: major as u32,
        minor: minor as u32,
        patch: patch as u32,
    }
}

pub(crate) fn stat_from_raw(raw: &lmdb_sys::MDB_stat) -> Stat {
    Stat {
        page_size: raw.ms_psize,
        depth: raw.ms_depth,
        branch_pages: raw.ms_branch_pages,
        leaf_pages: raw.ms_leaf_pages,
        overflow_pages: raw.ms_overflow_pages,
        entries: raw.ms_entries,
    }
}

fn env_flags(cfg: &EnvConfig) -> EnvironmentFlags {
    let mut flags = EnvironmentFlags::NO_TLS;
    let toggles = [
        (!cfg.subdir, EnvironmentFlags::NO_SUB_DIR),
        (cfg.readonly, EnvironmentFlags::READ_ONLY),
        (!cfg.metasync, EnvironmentFlags::NO_META_SYNC),
        (!cfg.sync, EnvironmentFlags::NO_SYNC),
        (cfg.map_async, EnvironmentFlags::MAP_ASYNC),
        (!cfg.readahead, EnvironmentFlags::NO_READAHEAD),
        (cfg.writemap, EnvironmentFlags::WRITE_MAP),
        (!cfg.meminit, EnvironmentFlags::NO_MEM_INIT),
        (!cfg.lock, EnvironmentFlags::NO_LOCK),
    ];
    for (enabled, flag) in toggles {
        if enabled {
            flags.insert(flag);
        }
    }
    flags
}

fn db_flags(opts: &DbOptions) -> DatabaseFlags {
    let mut flags = DatabaseFlags::empty();
    let toggles = [
        (opts.reverse_key, DatabaseFlags::REVERSE_KEY),
        (opts.dupsort, DatabaseFlags::DUP_SORT),
        (opts.integer_key, DatabaseFlags::INTEGER_KEY),
        (opts.dup_fixed, DatabaseFlags::DUP_FIXED),
        (opts.integer_dup, DatabaseFlags::INTEGER_DUP),
    ];
    for (enabled, flag) in toggles {
        if enabled {
            flags.insert(flag);
        }
    }
    flags
}

/// Check the path against the subdir/readonly/create settings and create the
/// directory if allowed.
fn prepare_path(cfg: &EnvConfig) -> Result<Created> {
    let path = cfg.path.as_path();
    let mut created = Created::default();

    if cfg.subdir {
        if path.exists() {
            if !path.is_dir() {
                return Err(AmdbError::Config(format!(
                    "{} exists and is not a directory",
                    path.display()
                )));
            }
            // LMDB creates whichever of these is missing, even when it then
            // rejects the environment.
            for name in [DATA_FILE, LOCK_FILE] {
                let file = path.join(name);
                if !file.exists() {
                    created.files.push(file);
                }
            }
            return Ok(created);
        }
        if cfg.readonly || !cfg.create {
            return Err(AmdbError::Config(format!(
                "environment directory {} does not exist",
                path.display()
            )));
        }
        // Remember the outermost directory we are about to create.
        created.dir = path
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
            .last()
            .map(Path::to_path_buf);
        DirBuilder::new()
            .recursive(true)
            .mode(cfg.mode)
            .create(path)
            .map_err(|e| {
                AmdbError::Config(format!("cannot create {}: {}", path.display(), e))
            })?;
        return Ok(created);
    }

    if path.is_dir() {
        return Err(AmdbError::Config(format!(
            "{} is a directory but subdir is disabled",
            path.display()
        )));
    }
    if !path.exists() {
        if cfg.readonly || !cfg.create {
            return Err(AmdbError::Config(format!(
                "environment file {} does not exist",
                path.display()
            )));
        }
        created.files.push(path.to_path_buf());
    }
    let mut lock_path = path.as_os_str().to_os_string();
    lock_path.push(LOCK_SUFFIX);
    let lock_path = PathBuf::from(lock_path);
    if !lock_path.exists() {
        created.files.push(lock_path);
    }
    Ok(created)
}
