//! Typed database handles
//!
//! A [`Database`] binds one LMDB database to a key coder and a value coder.
//! Every operation encodes on the worker, runs inside a single transaction
//! and decodes before the transaction ends, so no mapped memory ever
//! reaches the caller.

use crate::env::{ensure_live, EnvShared};
use amdb_core::{
    observe, AmdbError, Coder, IdentityCoder, MultiPutResult, PutOptions, Result, Stat, TxnMode,
};
use amdb_lmdb::{run_unit_of_work, TxnContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Handle on one database inside an [`Environment`](crate::Environment)
///
/// Clones share the same underlying database and invalidation state.
pub struct Database<K: Coder = IdentityCoder, V: Coder = IdentityCoder> {
    shared: Arc<EnvShared>,
    db: lmdb::Database,
    name: Option<Arc<str>>,
    dropped: Arc<AtomicBool>,
    key_coder: Arc<K>,
    value_coder: Arc<V>,
}

impl<K: Coder, V: Coder> Clone for Database<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            db: self.db,
            name: self.name.clone(),
            dropped: Arc::clone(&self.dropped),
            key_coder: Arc::clone(&self.key_coder),
            value_coder: Arc::clone(&self.value_coder),
        }
    }
}

impl<K: Coder, V: Coder> std::fmt::Debug for Database<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("dropped", &self.dropped.load(Ordering::Acquire))
            .finish()
    }
}

impl Database {
    pub(crate) fn new(
        shared: Arc<EnvShared>,
        db: lmdb::Database,
        name: Option<Arc<str>>,
        dropped: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shared,
            db,
            name,
            dropped,
            key_coder: Arc::new(IdentityCoder),
            value_coder: Arc::new(IdentityCoder),
        }
    }
}

impl<K: Coder, V: Coder> Database<K, V> {
    /// `None` for the default database
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn key_coder(&self) -> &K {
        &self.key_coder
    }

    pub fn value_coder(&self) -> &V {
        &self.value_coder
    }

    /// A handle on the same database that encodes through different coders.
    ///
    /// Both handles stay valid; nothing checks that the stored bytes match
    /// the new coders until they are decoded.
    pub fn with_coders<K2: Coder, V2: Coder>(&self, key_coder: K2, value_coder: V2) -> Database<K2, V2> {
        Database {
            shared: Arc::clone(&self.shared),
            db: self.db,
            name: self.name.clone(),
            dropped: Arc::clone(&self.dropped),
            key_coder: Arc::new(key_coder),
            value_coder: Arc::new(value_coder),
        }
    }

    /// Run a caller-defined unit of work inside one transaction on this
    /// database. The transaction commits if `work` returns `Ok`.
    pub async fn run<T, F>(&self, mode: TxnMode, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut TxnContext<'_>) -> Result<T> + Send + 'static,
    {
        if self.shared.is_closed() {
            return Err(AmdbError::Closed);
        }
        ensure_live(&self.dropped, self.name())?;
        self.shared.check_mode(mode)?;

        let db = self.db;
        let shared = Arc::clone(&self.shared);
        let dropped = Arc::clone(&self.dropped);
        let name = self.name.clone();
        debug!(db = self.name().unwrap_or("<default>"), mode = mode.as_str(), "scheduling unit of work");
        self.shared
            .schedule(false, move |store| {
                // The database may have been removed while this was queued.
                shared.with_live_handle(&dropped, name.as_deref(), || {
                    let started = Instant::now();
                    let result = run_unit_of_work(store.env(), db, mode, work);
                    observe::record_unit_of_work(mode, started.elapsed(), result.is_ok());
                    result
                })
            })
            .await
    }

    /// Value stored under `key`, if any
    pub async fn get(&self, key: K::Value) -> Result<Option<V::Value>> {
        let (kc, vc) = self.coders();
        self.run(TxnMode::Read, move |txn| {
            let key = kc.serialize(&key)?;
            txn.get_decoded(&key, &*vc)
        })
        .await
    }

    /// Value stored under `key`, or `default` when absent
    pub async fn get_or(&self, key: K::Value, default: V::Value) -> Result<V::Value> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Store a value, overwriting any existing one. Returns whether a record
    /// was written.
    pub async fn put(&self, key: K::Value, value: V::Value) -> Result<bool> {
        self.put_with_options(key, value, PutOptions::default()).await
    }

    pub async fn put_with_options(&self, key: K::Value, value: V::Value, options: PutOptions) -> Result<bool> {
        let (kc, vc) = self.coders();
        self.run(TxnMode::Write, move |txn| {
            let key = kc.serialize(&key)?;
            let value = vc.serialize(&value)?;
            txn.put(&key, &value, options)
        })
        .await
    }

    /// Delete every value under `key`. Returns whether anything was removed.
    pub async fn delete(&self, key: K::Value) -> Result<bool> {
        let kc = Arc::clone(&self.key_coder);
        self.run(TxnMode::Write, move |txn| {
            let key = kc.serialize(&key)?;
            txn.delete(&key, None)
        })
        .await
    }

    /// Delete one `(key, value)` pair of a duplicate-sorted database.
    ///
    /// Without duplicates this behaves like [`delete`](Self::delete).
    pub async fn delete_value(&self, key: K::Value, value: V::Value) -> Result<bool> {
        let (kc, vc) = self.coders();
        self.run(TxnMode::Write, move |txn| {
            let key = kc.serialize(&key)?;
            let value = vc.serialize(&value)?;
            txn.delete(&key, Some(value.as_slice()))
        })
        .await
    }

    /// Read and remove in one transaction.
    pub async fn pop(&self, key: K::Value) -> Result<Option<V::Value>> {
        let (kc, vc) = self.coders();
        self.run(TxnMode::Write, move |txn| {
            let key = kc.serialize(&key)?;
            let old = txn.pop(&key)?;
            vc.decode(old.as_deref())
        })
        .await
    }

    /// Store `value` and return the previous one.
    pub async fn replace(&self, key: K::Value, value: V::Value) -> Result<Option<V::Value>> {
        let (kc, vc) = self.coders();
        self.run(TxnMode::Write, move |txn| {
            let key = kc.serialize(&key)?;
            let value = vc.serialize(&value)?;
            let old = txn.replace(&key, &value)?;
            vc.decode(old.as_deref())
        })
        .await
    }

    /// Look up many keys in one read transaction. Results keep input order.
    pub async fn get_multi(
        &self,
        keys: impl IntoIterator<Item = K::Value>,
    ) -> Result<Vec<(K::Value, Option<V::Value>)>> {
        let keys: Vec<K::Value> = keys.into_iter().collect();
        let (kc, vc) = self.coders();
        self.run(TxnMode::Read, move |txn| {
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                let encoded = kc.serialize(&key)?;
                let value = txn.get_decoded(&encoded, &*vc)?;
                out.push((key, value));
            }
            Ok(out)
        })
        .await
    }

    /// Delete many keys in one write transaction. Results keep input order.
    pub async fn delete_multi(
        &self,
        keys: impl IntoIterator<Item = K::Value>,
    ) -> Result<Vec<(K::Value, bool)>> {
        let keys: Vec<K::Value> = keys.into_iter().collect();
        let kc = Arc::clone(&self.key_coder);
        self.run(TxnMode::Write, move |txn| {
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                let encoded = kc.serialize(&key)?;
                let removed = txn.delete(&encoded, None)?;
                out.push((key, removed));
            }
            Ok(out)
        })
        .await
    }

    /// Write many pairs through a single cursor with default options.
    pub async fn put_multi(
        &self,
        items: impl IntoIterator<Item = (K::Value, V::Value)>,
    ) -> Result<MultiPutResult> {
        self.put_multi_with_options(items, PutOptions::default()).await
    }

    /// Every pair is encoded before the cursor loop starts.
    pub async fn put_multi_with_options(
        &self,
        items: impl IntoIterator<Item = (K::Value, V::Value)>,
        options: PutOptions,
    ) -> Result<MultiPutResult> {
        let items: Vec<(K::Value, V::Value)> = items.into_iter().collect();
        let (kc, vc) = self.coders();
        self.run(TxnMode::Write, move |txn| {
            let encoded = items
                .iter()
                .map(|(k, v)| Ok((kc.serialize(k)?, vc.serialize(v)?)))
                .collect::<Result<Vec<_>>>()?;
            txn.put_multi(&encoded, options)
        })
        .await
    }

    /// Empty the database, and with `delete_records` remove it entirely.
    ///
    /// A removed database invalidates every handle opened on it, clones and
    /// separately opened handles alike. The default database is only ever
    /// emptied.
    pub async fn drop_db(&self, delete_records: bool) -> Result<()> {
        if !delete_records || self.name.is_none() {
            return self.run(TxnMode::Write, |txn| txn.drop_db(false)).await;
        }
        if self.shared.is_closed() {
            return Err(AmdbError::Closed);
        }
        ensure_live(&self.dropped, self.name())?;
        self.shared.check_mode(TxnMode::Write)?;

        let db = self.db;
        let shared = Arc::clone(&self.shared);
        let dropped = Arc::clone(&self.dropped);
        let name = self.name.clone();
        self.shared
            .schedule(false, move |store| {
                shared.retire_handle(db.dbi(), &dropped, name.as_deref(), || {
                    let started = Instant::now();
                    let result = run_unit_of_work(store.env(), db, TxnMode::Write, |txn| {
                        txn.drop_db(true)
                    });
                    observe::record_unit_of_work(TxnMode::Write, started.elapsed(), result.is_ok());
                    result
                })
            })
            .await?;
        debug!(db = self.name().unwrap_or_default(), "database removed");
        Ok(())
    }

    pub async fn stat(&self) -> Result<Stat> {
        self.run(TxnMode::Read, |txn| txn.stat()).await
    }

    /// Every record, decoded, in key order
    pub async fn items(&self) -> Result<Vec<(K::Value, V::Value)>> {
        let (kc, vc) = self.coders();
        self.run(TxnMode::Read, move |txn| {
            let mut out = Vec::new();
            txn.scan(None, |k, v| {
                out.push((kc.deserialize(k)?, vc.deserialize(v)?));
                Ok(true)
            })?;
            Ok(out)
        })
        .await
    }

    /// Records whose encoded key starts with the encoded `prefix`
    pub async fn prefix(&self, prefix: K::Value) -> Result<Vec<(K::Value, V::Value)>> {
        let (kc, vc) = self.coders();
        self.run(TxnMode::Read, move |txn| {
            let prefix = kc.serialize(&prefix)?;
            let mut out = Vec::new();
            txn.scan(Some(prefix.as_slice()), |k, v| {
                if !k.starts_with(&prefix) {
                    return Ok(false);
                }
                out.push((kc.deserialize(k)?, vc.deserialize(v)?));
                Ok(true)
            })?;
            Ok(out)
        })
        .await
    }

    /// All values under `key` in a duplicate-sorted database
    pub async fn get_dups(&self, key: K::Value) -> Result<Vec<V::Value>> {
        let (kc, vc) = self.coders();
        self.run(TxnMode::Read, move |txn| {
            let key = kc.serialize(&key)?;
            txn.get_dups(&key)?
                .iter()
                .map(|bytes| vc.deserialize(bytes))
                .collect::<Result<Vec<_>>>()
        })
        .await
    }

    fn coders(&self) -> (Arc<K>, Arc<V>) {
        (Arc::clone(&self.key_coder), Arc::clone(&self.value_coder))
    }
}
