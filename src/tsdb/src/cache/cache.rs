use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tsmdb_utils::time::now_unix_nano;

use crate::cache::ring::Ring;
use crate::engine::tsm1::value::Values;
use crate::error::{Error, Result};

/// Entry is the set of values of one series key held in the cache. Its block type is fixed
/// by the first write.
pub struct Entry {
    values: RwLock<Values>,
    typ: u8,
}

impl Entry {
    pub fn new(values: Values) -> Self {
        Self {
            typ: values.block_type(),
            values: RwLock::new(values),
        }
    }

    pub fn block_type(&self) -> u8 {
        self.typ
    }

    /// add appends values to the entry. Values of another type are rejected.
    pub fn add(&self, values: Values) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        if values.block_type() != self.typ {
            return Err(Error::FieldTypeConflict {
                expected: self.typ,
                actual: values.block_type(),
            });
        }

        self.values.write().append(values)
    }

    /// values returns a sorted, deduplicated copy of the entry.
    pub fn values(&self) -> Values {
        let mut inner = self.values.write();
        if !inner.ordered() {
            let v = std::mem::replace(&mut *inner, Values::Float(vec![]));
            *inner = v.deduplicate();
        }
        inner.clone()
    }

    pub fn count(&self) -> usize {
        self.values.read().len()
    }

    pub fn size(&self) -> usize {
        self.values.read().size()
    }

    /// exclude drops the values within [min, max] and returns the number of bytes released.
    pub fn exclude(&self, min: i64, max: i64) -> usize {
        let mut inner = self.values.write();
        let before = inner.size();
        let v = std::mem::replace(&mut *inner, Values::Float(vec![]));
        *inner = v.deduplicate().exclude(min, max);
        before.saturating_sub(inner.size())
    }
}

/// Cache holds the recent writes of a shard in memory until they are snapshotted to a TSM
/// file. A snapshot moves the live store aside so that writes continue in a fresh ring while
/// the snapshot is persisted.
pub struct Cache {
    store: RwLock<Arc<Ring>>,
    snapshot: RwLock<Option<Arc<Ring>>>,

    size: AtomicU64,
    snapshot_size: AtomicU64,

    /// zero disables the limit.
    max_size: AtomicU64,

    /// unix nanoseconds of the last write or delete.
    last_write: AtomicI64,
}

impl Cache {
    pub fn new(max_size: u64) -> Self {
        Self {
            store: RwLock::new(Arc::new(Ring::default())),
            snapshot: RwLock::new(None),
            size: AtomicU64::new(0),
            snapshot_size: AtomicU64::new(0),
            max_size: AtomicU64::new(max_size),
            last_write: AtomicI64::new(now_unix_nano()),
        }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::SeqCst)
    }

    pub fn set_max_size(&self, max_size: u64) {
        self.max_size.store(max_size, Ordering::SeqCst)
    }

    /// size returns the number of bytes held by the live store and the snapshot.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst) + self.snapshot_size.load(Ordering::SeqCst)
    }

    /// live_size returns the number of bytes written since the last snapshot.
    pub fn live_size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    pub fn last_write(&self) -> i64 {
        self.last_write.load(Ordering::SeqCst)
    }

    /// check_limit fails if adding `add` bytes would exceed the memory limit.
    pub fn check_limit(&self, add: u64) -> Result<()> {
        let max = self.max_size();
        let size = self.size() + add;
        if max > 0 && size > max {
            return Err(Error::CacheMaxMemorySizeExceeded { size, max });
        }
        Ok(())
    }

    /// write adds values for key. It fails when the memory limit would be exceeded or when
    /// the key already holds values of another type.
    pub fn write(&self, key: &[u8], values: Values) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let add = values.size() as u64;
        self.check_limit(add)?;

        if let Some(typ) = self.snapshot_type(key) {
            if typ != values.block_type() {
                return Err(Error::FieldTypeConflict {
                    expected: typ,
                    actual: values.block_type(),
                });
            }
        }

        {
            // held across the size update so a snapshot sees a consistent size
            let store = self.store.read();
            store.write(key, values)?;
            self.size.fetch_add(add, Ordering::SeqCst);
        }

        self.last_write.store(now_unix_nano(), Ordering::SeqCst);
        Ok(())
    }

    /// write_multi writes every key or none of them. The whole batch is checked against the
    /// memory limit and the cached types before anything is applied.
    pub fn write_multi(&self, values: Vec<(Vec<u8>, Values)>) -> Result<()> {
        let values: Vec<_> = values.into_iter().filter(|(_, v)| !v.is_empty()).collect();
        if values.is_empty() {
            return Ok(());
        }
        self.validate(&values)?;

        {
            let store = self.store.read();
            for (key, v) in values {
                let add = v.size() as u64;
                store.write(&key, v)?;
                self.size.fetch_add(add, Ordering::SeqCst);
            }
        }

        self.last_write.store(now_unix_nano(), Ordering::SeqCst);
        Ok(())
    }

    /// validate checks a batch against the memory limit and the types already cached,
    /// including conflicts between keys of the batch itself. Nothing is changed.
    pub fn validate(&self, values: &[(Vec<u8>, Values)]) -> Result<()> {
        self.check_limit(values.iter().map(|(_, v)| v.size() as u64).sum())?;

        let mut batch: HashMap<&[u8], u8> = HashMap::with_capacity(values.len());
        for (key, v) in values {
            let typ = v.block_type();
            let existing = batch
                .get(key.as_slice())
                .copied()
                .or_else(|| self.block_type(key));
            if let Some(expected) = existing {
                if expected != typ {
                    return Err(Error::FieldTypeConflict {
                        expected,
                        actual: typ,
                    });
                }
            }
            batch.insert(key.as_slice(), typ);
        }
        Ok(())
    }

    /// block_type returns the type of the values cached for key, live store first.
    pub fn block_type(&self, key: &[u8]) -> Option<u8> {
        self.store
            .read()
            .entry(key)
            .map(|e| e.block_type())
            .or_else(|| self.snapshot_type(key))
    }

    fn snapshot_type(&self, key: &[u8]) -> Option<u8> {
        self.snapshot
            .read()
            .as_ref()
            .and_then(|s| s.entry(key))
            .map(|e| e.block_type())
    }

    /// snapshot moves the live store into the snapshot and returns it. When a previous
    /// snapshot was never cleared, the live store is merged into it instead.
    pub fn snapshot(&self) -> Arc<Ring> {
        let mut snapshot = self.snapshot.write();
        let mut store = self.store.write();

        let current = std::mem::replace(&mut *store, Arc::new(Ring::default()));
        let size = self.size.swap(0, Ordering::SeqCst);
        self.snapshot_size.fetch_add(size, Ordering::SeqCst);

        match snapshot.as_ref() {
            None => {
                *snapshot = Some(current.clone());
                current
            }
            Some(s) => {
                current.apply(|key, entry| match s.entry(key) {
                    Some(existing) => {
                        if let Err(e) = existing.add(entry.values()) {
                            warn!(
                                "dropping cache values of {} while merging snapshot: {}",
                                String::from_utf8_lossy(key),
                                e
                            );
                        }
                    }
                    None => s.add(key.to_vec(), entry.clone()),
                });
                s.clone()
            }
        }
    }

    /// clear_snapshot drops the snapshot once it was persisted. On failure the snapshot is
    /// kept and the next snapshot is merged into it.
    pub fn clear_snapshot(&self, success: bool) {
        if !success {
            return;
        }
        let mut snapshot = self.snapshot.write();
        *snapshot = None;
        self.snapshot_size.store(0, Ordering::SeqCst);
    }

    /// values returns the cached values of key, the live store winning over the snapshot on
    /// equal timestamps. None if the key is not cached.
    pub fn values(&self, key: &[u8]) -> Result<Option<Values>> {
        let snap = self
            .snapshot
            .read()
            .as_ref()
            .and_then(|s| s.entry(key))
            .map(|e| e.values());
        let live = self.store.read().entry(key).map(|e| e.values());

        match (snap, live) {
            (None, None) => Ok(None),
            (Some(v), None) | (None, Some(v)) => Ok(Some(v)),
            (Some(a), Some(b)) => Ok(Some(a.merge(b)?)),
        }
    }

    /// delete_range removes the values of keys within [min, max] from the live store and the
    /// snapshot. Entries left empty are removed.
    pub fn delete_range(&self, keys: &[Vec<u8>], min: i64, max: i64) {
        {
            let store = self.store.read();
            let released = Self::delete_from(&store, keys, min, max);
            sub_saturating(&self.size, released);
        }
        if let Some(s) = self.snapshot.read().as_ref() {
            let released = Self::delete_from(s, keys, min, max);
            sub_saturating(&self.snapshot_size, released);
        }
        self.last_write.store(now_unix_nano(), Ordering::SeqCst);
    }

    fn delete_from(ring: &Ring, keys: &[Vec<u8>], min: i64, max: i64) -> u64 {
        let mut released = 0;
        for key in keys {
            let entry = match ring.entry(key) {
                Some(e) => e,
                None => continue,
            };
            released += entry.exclude(min, max) as u64;
            if entry.count() == 0 {
                ring.remove(key);
            }
        }
        released
    }

    /// keys returns the sorted keys held by the live store and the snapshot.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut keys = self.store.read().keys(false);
        if let Some(s) = self.snapshot.read().as_ref() {
            keys.extend(s.keys(false));
        }
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
            && self
                .snapshot
                .read()
                .as_ref()
                .map(|s| s.is_empty())
                .unwrap_or(true)
    }
}

fn sub_saturating(v: &AtomicU64, n: u64) {
    let _ = v.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| {
        Some(x.saturating_sub(n))
    });
}
