//! Transaction context
//!
//! A [`TxnContext`] wraps one LMDB transaction bound to one database. It is
//! only ever handed to a unit of work by [`run_unit_of_work`], which commits
//! it when the work returns `Ok` and aborts it otherwise (including when the
//! work panics, since dropping an LMDB transaction aborts it).
//!
//! Byte slices never escape: every read copies out of the memory map before
//! the call returns.

use crate::error::map_store_err;
use crate::store::stat_from_raw;
use amdb_core::{AmdbError, Coder, MultiPutResult, PutOptions, Result, Stat, TxnMode};
use lmdb::{
    Cursor, Database, Environment, RoTransaction, RwTransaction, Transaction, WriteFlags,
};

enum TxnInner<'env> {
    Read(RoTransaction<'env>),
    Write(RwTransaction<'env>),
}

/// Lifecycle of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// Operations available to a unit of work
pub struct TxnContext<'env> {
    inner: Option<TxnInner<'env>>,
    db: Database,
    mode: TxnMode,
    state: TxnState,
}

// Reads dispatch on the transaction kind; `Transaction::get` is generic and
// cannot go through a trait object.
macro_rules! with_txn {
    ($ctx:expr, $txn:ident => $body:expr) => {
        match $ctx.inner()? {
            TxnInner::Read($txn) => $body,
            TxnInner::Write($txn) => $body,
        }
    };
}

impl<'env> TxnContext<'env> {
    pub fn begin(env: &'env Environment, db: Database, mode: TxnMode) -> Result<Self> {
        let inner = match mode {
            TxnMode::Read => TxnInner::Read(env.begin_ro_txn().map_err(map_store_err)?),
            TxnMode::Write => TxnInner::Write(env.begin_rw_txn().map_err(map_store_err)?),
        };
        Ok(Self {
            inner: Some(inner),
            db,
            mode,
            state: TxnState::Active,
        })
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    fn inner(&self) -> Result<&TxnInner<'env>> {
        self.inner.as_ref().ok_or(AmdbError::TxnFinished)
    }

    fn writer(&mut self) -> Result<&mut RwTransaction<'env>> {
        match self.inner.as_mut() {
            None => Err(AmdbError::TxnFinished),
            Some(TxnInner::Read(_)) => Err(AmdbError::ReadOnly(
                "write operation in a read transaction".into(),
            )),
            Some(TxnInner::Write(txn)) => Ok(txn),
        }
    }

    /// LMDB poisons a write transaction after most failures; give it up so
    /// later calls report `TxnFinished` instead of an opaque store error.
    fn poison(&mut self, err: lmdb::Error) -> AmdbError {
        if let Some(inner) = self.inner.take() {
            match inner {
                TxnInner::Read(txn) => txn.abort(),
                TxnInner::Write(txn) => txn.abort(),
            }
            self.state = TxnState::Aborted;
        }
        map_store_err(err)
    }

    /// Look up `key`, copying the value out.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_with(key, |bytes| Ok(bytes.to_vec()))
    }

    /// Look up `key` and decode the stored bytes in place.
    pub fn get_decoded<C: Coder>(&self, key: &[u8], coder: &C) -> Result<Option<C::Value>> {
        self.get_with(key, |bytes| coder.deserialize(bytes))
    }

    fn get_with<T>(&self, key: &[u8], f: impl FnOnce(&[u8]) -> Result<T>) -> Result<Option<T>> {
        let found = with_txn!(self, txn => txn.get(self.db, &key));
        match found {
            Ok(bytes) => f(bytes).map(Some),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(map_store_err(e)),
        }
    }

    /// Store `value` under `key`.
    ///
    /// Returns `false` when the write was skipped because the key (or, with
    /// `dup_data` off, the exact pair) already exists.
    pub fn put(&mut self, key: &[u8], value: &[u8], opts: PutOptions) -> Result<bool> {
        let db = self.db;
        let result = self.writer()?.put(db, &key, &value, write_flags(opts));
        match result {
            Ok(()) => Ok(true),
            Err(lmdb::Error::KeyExist) => Ok(false),
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Delete `key`, or only the `(key, value)` pair in a duplicate-sorted
    /// database. Returns whether anything was removed.
    pub fn delete(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<bool> {
        let dbi = self.db.dbi();
        let raw_txn = self.writer()?.txn();
        // `RwTransaction::del` hands LMDB a pointer to a temporary copy of the
        // data value; build both values here so they outlive the call.
        let mut key_val = raw_val(key);
        let mut data_val = value.map(raw_val);
        let data_ptr = data_val
            .as_mut()
            .map_or(std::ptr::null_mut(), |val| val as *mut lmdb_sys::MDB_val);
        let rc = unsafe { lmdb_sys::mdb_del(raw_txn, dbi, &mut key_val, data_ptr) };
        match rc {
            0 => Ok(true),
            lmdb_sys::MDB_NOTFOUND => Ok(false),
            code => Err(self.poison(lmdb::Error::from_err_code(code))),
        }
    }

    /// Fetch then delete. In a duplicate-sorted database only the first
    /// value is removed.
    pub fn pop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.writer()?;
        let Some(old) = self.get(key)? else {
            return Ok(None);
        };
        self.delete(key, Some(old.as_slice()))?;
        Ok(Some(old))
    }

    /// Store `value` and return what was there before. Any duplicates of
    /// `key` are removed first.
    pub fn replace(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.writer()?;
        let old = self.get(key)?;
        if old.is_some() {
            self.delete(key, None)?;
        }
        self.put(key, value, PutOptions::default())?;
        Ok(old)
    }

    /// Write many pairs through one cursor.
    pub fn put_multi<K, V>(&mut self, items: &[(K, V)], opts: PutOptions) -> Result<MultiPutResult>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let db = self.db;
        let flags = write_flags(opts);
        let mut outcome = MultiPutResult::default();
        let mut failure = None;
        {
            let mut cursor = self.writer()?.open_rw_cursor(db).map_err(map_store_err)?;
            for (key, value) in items {
                match cursor.put(key, value, flags) {
                    Ok(()) => outcome.added += 1,
                    Err(lmdb::Error::KeyExist) => {}
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
                outcome.consumed += 1;
            }
        }
        match failure {
            Some(e) => Err(self.poison(e)),
            None => Ok(outcome),
        }
    }

    /// Empty the database; with `delete` also remove it from the
    /// environment. The unnamed database can only be emptied.
    pub fn drop_db(&mut self, delete: bool) -> Result<()> {
        let db = self.db;
        let txn = self.writer()?;
        let result = if delete {
            // The handle is invalid once this transaction commits; callers
            // must stop using it.
            unsafe { txn.drop_db(db) }
        } else {
            txn.clear_db(db)
        };
        result.map_err(|e| self.poison(e))
    }

    pub fn stat(&self) -> Result<Stat> {
        let raw_txn = with_txn!(self, txn => txn.txn());
        let mut raw: lmdb_sys::MDB_stat = unsafe { std::mem::zeroed() };
        crate::error::check_rc(unsafe { lmdb_sys::mdb_stat(raw_txn, self.db.dbi(), &mut raw) })?;
        Ok(stat_from_raw(&raw))
    }

    /// Visit pairs in key order starting at the first key `>= start` (or the
    /// first key). The visitor returns `false` to stop.
    pub fn scan<F>(&self, start: Option<&[u8]>, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        with_txn!(self, txn => scan_txn(txn, self.db, start, &mut visit))
    }

    /// All pairs, copied out
    pub fn items(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        self.scan(None, |k, v| {
            out.push((k.to_vec(), v.to_vec()));
            Ok(true)
        })?;
        Ok(out)
    }

    /// Pairs whose key starts with `prefix`
    pub fn prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        self.scan(Some(prefix), |k, v| {
            if !k.starts_with(prefix) {
                return Ok(false);
            }
            out.push((k.to_vec(), v.to_vec()));
            Ok(true)
        })?;
        Ok(out)
    }

    /// Every value stored under `key`, in sort order. A database without
    /// duplicates yields at most one.
    pub fn get_dups(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        with_txn!(self, txn => dups_txn(txn, self.db, key))
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        let inner = self.inner.take().ok_or(AmdbError::TxnFinished)?;
        if !commit {
            match inner {
                TxnInner::Read(txn) => txn.abort(),
                TxnInner::Write(txn) => txn.abort(),
            }
            self.state = TxnState::Aborted;
            return Ok(());
        }
        let result = match inner {
            TxnInner::Read(txn) => txn.commit(),
            TxnInner::Write(txn) => txn.commit(),
        };
        match result {
            Ok(()) => {
                self.state = TxnState::Committed;
                Ok(())
            }
            Err(e) => {
                self.state = TxnState::Aborted;
                Err(map_store_err(e))
            }
        }
    }
}

fn write_flags(opts: PutOptions) -> WriteFlags {
    let mut flags = WriteFlags::empty();
    if !opts.overwrite {
        flags.insert(WriteFlags::NO_OVERWRITE);
    }
    if !opts.dup_data {
        flags.insert(WriteFlags::NO_DUP_DATA);
    }
    flags
}

fn raw_val(bytes: &[u8]) -> lmdb_sys::MDB_val {
    lmdb_sys::MDB_val {
        mv_size: bytes.len(),
        mv_data: bytes.as_ptr() as *mut libc::c_void,
    }
}

fn scan_txn<T: Transaction>(
    txn: &T,
    db: Database,
    start: Option<&[u8]>,
    visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>,
) -> Result<()> {
    let cursor = txn.open_ro_cursor(db).map_err(map_store_err)?;
    let mut step = match start {
        Some(key) => cursor
            .get(Some(key), None, lmdb_sys::MDB_SET_RANGE)
            .map(|(k, v)| (k.unwrap_or(key), v)),
        None => cursor
            .get(None, None, lmdb_sys::MDB_FIRST)
            .map(|(k, v)| (k.unwrap_or_default(), v)),
    };
    loop {
        match step {
            Ok((key, value)) => {
                if !visit(key, value)? {
                    return Ok(());
                }
            }
            Err(lmdb::Error::NotFound) => return Ok(()),
            Err(e) => return Err(map_store_err(e)),
        }
        step = cursor
            .get(None, None, lmdb_sys::MDB_NEXT)
            .map(|(k, v)| (k.unwrap_or_default(), v));
    }
}

fn dups_txn<T: Transaction>(txn: &T, db: Database, key: &[u8]) -> Result<Vec<Vec<u8>>> {
    let cursor = txn.open_ro_cursor(db).map_err(map_store_err)?;
    let mut out = Vec::new();
    let mut step = cursor.get(Some(key), None, lmdb_sys::MDB_SET_KEY);
    loop {
        match step {
            Ok((_, value)) => out.push(value.to_vec()),
            Err(lmdb::Error::NotFound) => return Ok(out),
            Err(e) => return Err(map_store_err(e)),
        }
        step = cursor.get(None, None, lmdb_sys::MDB_NEXT_DUP);
    }
}

/// Run `work` inside a fresh transaction on `db`.
///
/// Commits when `work` returns `Ok`; aborts and passes the error through
/// otherwise.
pub fn run_unit_of_work<T, F>(env: &Environment, db: Database, mode: TxnMode, work: F) -> Result<T>
where
    F: FnOnce(&mut TxnContext<'_>) -> Result<T>,
{
    let mut ctx = TxnContext::begin(env, db, mode)?;
    match work(&mut ctx) {
        Ok(value) => {
            if ctx.state() == TxnState::Active {
                ctx.finish(true)?;
                Ok(value)
            } else {
                // A store failure inside the work already aborted the
                // transaction and the work chose to swallow it.
                Err(AmdbError::TxnFinished)
            }
        }
        Err(e) => {
            if ctx.state() == TxnState::Active {
                ctx.finish(false)?;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LmdbStore;
    use amdb_core::{DbOptions, EnvConfig, IdentityCoder, UIntCoder};
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let cfg = EnvConfig::new(temp.path().join("env")).with_max_dbs(4);
        (LmdbStore::open(&cfg).unwrap(), temp)
    }

    fn main_db(store: &LmdbStore) -> Database {
        store
            .open_db(None, &DbOptions::new().with_create(false))
            .unwrap()
    }

    #[test]
    fn test_commit_on_ok() {
        let (store, _temp) = create_test_store();
        let db = main_db(&store);

        run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            assert!(txn.put(b"a", b"1", PutOptions::default())?);
            Ok(())
        })
        .unwrap();

        let value = run_unit_of_work(store.env(), db, TxnMode::Read, |txn| txn.get(b"a")).unwrap();
        assert_eq!(value, Some(b"1".to_vec()));
    }

    #[test]
    fn test_abort_on_err() {
        let (store, _temp) = create_test_store();
        let db = main_db(&store);

        let result: Result<()> = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            txn.put(b"a", b"1", PutOptions::default())?;
            Err(AmdbError::Internal("boom".into()))
        });
        assert!(matches!(result, Err(AmdbError::Internal(_))));

        let value = run_unit_of_work(store.env(), db, TxnMode::Read, |txn| txn.get(b"a")).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_read_mode_rejects_writes() {
        let (store, _temp) = create_test_store();
        let db = main_db(&store);

        let err = run_unit_of_work(store.env(), db, TxnMode::Read, |txn| {
            txn.put(b"a", b"1", PutOptions::default())
        })
        .unwrap_err();
        assert!(matches!(err, AmdbError::ReadOnly(_)));
    }

    #[test]
    fn test_put_without_overwrite() {
        let (store, _temp) = create_test_store();
        let db = main_db(&store);

        let (first, second, value) = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            let first = txn.put(b"k", b"v1", PutOptions::no_overwrite())?;
            let second = txn.put(b"k", b"v2", PutOptions::no_overwrite())?;
            Ok((first, second, txn.get(b"k")?))
        })
        .unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(value, Some(b"v1".to_vec()));
    }

    #[test]
    fn test_delete_pop_replace() {
        let (store, _temp) = create_test_store();
        let db = main_db(&store);

        run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            txn.put(b"k", b"v", PutOptions::default())?;
            assert!(txn.delete(b"k", None)?);
            assert!(!txn.delete(b"k", None)?);

            txn.put(b"p", b"1", PutOptions::default())?;
            assert_eq!(txn.pop(b"p")?, Some(b"1".to_vec()));
            assert_eq!(txn.pop(b"p")?, None);

            assert_eq!(txn.replace(b"r", b"1")?, None);
            assert_eq!(txn.replace(b"r", b"2")?, Some(b"1".to_vec()));
            assert_eq!(txn.get(b"r")?, Some(b"2".to_vec()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_dupsort_semantics() {
        let (store, _temp) = create_test_store();
        let db = store
            .open_db(Some("dups"), &DbOptions::new().with_dupsort(true))
            .unwrap();

        run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            txn.put(b"k", b"b", PutOptions::default())?;
            txn.put(b"k", b"a", PutOptions::default())?;
            assert!(!txn.put(b"k", b"a", PutOptions::no_dup_data())?);
            assert_eq!(txn.get_dups(b"k")?, vec![b"a".to_vec(), b"b".to_vec()]);

            // pop takes the first duplicate only
            assert_eq!(txn.pop(b"k")?, Some(b"a".to_vec()));
            assert_eq!(txn.get_dups(b"k")?, vec![b"b".to_vec()]);

            txn.put(b"k", b"c", PutOptions::default())?;
            assert_eq!(txn.replace(b"k", b"z")?, Some(b"b".to_vec()));
            assert_eq!(txn.get_dups(b"k")?, vec![b"z".to_vec()]);

            assert!(txn.delete(b"k", Some(b"z"))?);
            assert!(txn.get_dups(b"k")?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_put_multi_counts() {
        let (store, _temp) = create_test_store();
        let db = main_db(&store);

        let items = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"a".to_vec(), b"3".to_vec()),
        ];
        let result = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            txn.put_multi(&items, PutOptions::no_overwrite())
        })
        .unwrap();
        assert_eq!(result.consumed, 3);
        assert_eq!(result.added, 2);
    }

    #[test]
    fn test_scan_and_prefix() {
        let (store, _temp) = create_test_store();
        let db = main_db(&store);

        run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            for key in [&b"user:2"[..], b"user:1", b"item:1", b"zeta"] {
                txn.put(key, b"x", PutOptions::default())?;
            }
            Ok(())
        })
        .unwrap();

        let (all, users) = run_unit_of_work(store.env(), db, TxnMode::Read, |txn| {
            Ok((txn.items()?, txn.prefix(b"user:")?))
        })
        .unwrap();
        let keys: Vec<_> = all.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"item:1"[..], b"user:1", b"user:2", b"zeta"]);
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].0, b"user:1");
    }

    #[test]
    fn test_decoded_get() {
        let (store, _temp) = create_test_store();
        let db = main_db(&store);
        let coder = UIntCoder::u32();

        let value = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            txn.put(b"n", &coder.serialize(&42)?, PutOptions::default())?;
            txn.get_decoded(b"n", &coder)
        })
        .unwrap();
        assert_eq!(value, Some(42));

        let missing = run_unit_of_work(store.env(), db, TxnMode::Read, |txn| {
            txn.get_decoded(b"nope", &IdentityCoder)
        })
        .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_drop_clears_and_stat() {
        let (store, _temp) = create_test_store();
        let db = store.open_db(Some("scratch"), &DbOptions::new()).unwrap();

        let entries = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            txn.put(b"a", b"1", PutOptions::default())?;
            txn.put(b"b", b"2", PutOptions::default())?;
            Ok(txn.stat()?.entries)
        })
        .unwrap();
        assert_eq!(entries, 2);

        let after = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            txn.drop_db(false)?;
            Ok(txn.stat()?.entries)
        })
        .unwrap();
        assert_eq!(after, 0);
    }

    #[test]
    fn test_capacity_failure_finishes_txn() {
        let temp = TempDir::new().unwrap();
        let cfg = EnvConfig::new(temp.path().join("env")).with_map_size(64 * 1024);
        let store = LmdbStore::open(&cfg).unwrap();
        let db = main_db(&store);

        let err = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            let big = vec![7u8; 4096];
            for i in 0u32..1000 {
                txn.put(&i.to_be_bytes(), &big, PutOptions::default())?;
            }
            Ok(())
        })
        .unwrap_err();
        assert!(err.is_capacity());

        // Swallowing the failure does not bring the transaction back, and
        // the unit of work still fails.
        let big = vec![7u8; 4096];
        let mut after_failure = None;
        let err = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            for i in 0u32..1000 {
                if let Err(e) = txn.put(&i.to_be_bytes(), &big, PutOptions::default()) {
                    assert!(e.is_capacity());
                    break;
                }
            }
            assert_eq!(txn.state(), TxnState::Aborted);
            after_failure = Some(txn.get(b"anything"));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, AmdbError::TxnFinished));
        assert!(matches!(after_failure, Some(Err(AmdbError::TxnFinished))));

        let entries = run_unit_of_work(store.env(), db, TxnMode::Read, |txn| Ok(txn.stat()?.entries))
            .unwrap();
        assert_eq!(entries, 0);
    }

    #[test]
    fn test_dupsort_delete_exact_pair() {
        let (store, _temp) = create_test_store();
        let db = store
            .open_db(Some("colors"), &DbOptions::new().with_dupsort(true))
            .unwrap();

        run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            for color in [&b"red"[..], b"blue", b"green"] {
                txn.put(b"item", color, PutOptions::default())?;
            }
            Ok(())
        })
        .unwrap();

        let (removed, missing, popped, left) = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
            let removed = txn.delete(b"item", Some(b"green"))?;
            let missing = txn.delete(b"item", Some(b"purple"))?;
            let popped = txn.pop(b"item")?;
            Ok((removed, missing, popped, txn.get_dups(b"item")?))
        })
        .unwrap();
        assert!(removed);
        assert!(!missing);
        assert_eq!(popped, Some(b"blue".to_vec()));
        assert_eq!(left, vec![b"red".to_vec()]);
    }
}
