use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::cache::Entry;
use crate::engine::tsm1::value::Values;
use crate::error::Result;

/// Partition is one shard of a Ring, a key to Entry map behind its own lock.
#[derive(Default)]
pub struct Partition {
    store: RwLock<HashMap<Vec<u8>, Arc<Entry>>>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(&[u8], &Arc<Entry>),
    {
        let inner = self.store.read();
        for (k, v) in inner.iter() {
            f(k.as_slice(), v)
        }
    }

    pub fn entry(&self, key: &[u8]) -> Option<Arc<Entry>> {
        self.store.read().get(key).cloned()
    }

    /// write appends values to the entry of key, creating it if needed. The entry keeps the
    /// type of the first values written to it.
    pub fn write(&self, key: &[u8], values: Values) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let e = {
            let inner = self.store.read();
            inner.get(key).cloned()
        };
        if let Some(e) = e {
            return e.add(values);
        }

        let mut inner = self.store.write();
        match inner.get(key) {
            // raced with another writer of the same key
            Some(e) => e.add(values),
            None => {
                inner.insert(key.to_vec(), Arc::new(Entry::new(values)));
                Ok(())
            }
        }
    }

    pub fn add(&self, key: Vec<u8>, entry: Arc<Entry>) {
        self.store.write().insert(key, entry);
    }

    pub fn remove(&self, key: &[u8]) -> Option<Arc<Entry>> {
        self.store.write().remove(key)
    }

    pub fn keys<F>(&self, mut cb: F)
    where
        F: FnMut(&[u8]),
    {
        let inner = self.store.read();
        for (k, v) in inner.iter() {
            if v.count() == 0 {
                continue;
            }
            cb(k.as_slice());
        }
    }

    pub fn reset(&self) {
        self.store.write().clear();
    }

    /// count returns the number of values held by the partition.
    pub fn count(&self) -> usize {
        self.store.read().values().map(|e| e.count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tsm1::value::Value;
    use crate::error::Error;

    use super::*;

    #[test]
    fn test_partition_write() {
        let p = Partition::new();
        p.write(b"cpu", Values::Float(vec![Value::new(1, 1.0)]))
            .unwrap();
        p.write(b"cpu", Values::Float(vec![Value::new(2, 2.0)]))
            .unwrap();
        p.write(b"mem", Values::Integer(vec![])).unwrap();

        assert_eq!(p.len(), 1);
        assert_eq!(p.count(), 2);

        let err = p
            .write(b"cpu", Values::Integer(vec![Value::new(3, 3)]))
            .unwrap_err();
        assert!(matches!(err, Error::FieldTypeConflict { .. }));

        let mut keys = vec![];
        p.keys(|k| keys.push(k.to_vec()));
        assert_eq!(keys, vec![b"cpu".to_vec()]);

        assert!(p.remove(b"cpu").is_some());
        assert!(p.is_empty());
    }
}
