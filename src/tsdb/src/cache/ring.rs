use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::cache::Entry;
use crate::cache::partition::Partition;
use crate::engine::tsm1::value::Values;
use crate::error::{Error, Result};

/// PARTITIONS is the maximum number of partitions a Ring can have.
const PARTITIONS: usize = 16;

/// Ring spreads keys over a fixed number of partitions by hashing them, so that writers of
/// different keys rarely contend on the same lock.
pub struct Ring {
    keys_hint: AtomicU64,
    partitions: Vec<Partition>,
}

impl Ring {
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 || n > PARTITIONS {
            return Err(Error::InvalidConfig(format!(
                "ring partitions must be in [1, {}], got {}",
                PARTITIONS, n
            )));
        }

        Ok(Self {
            keys_hint: AtomicU64::new(0),
            partitions: (0..n).map(|_| Partition::new()).collect(),
        })
    }

    pub fn reset(&self) {
        self.partitions.iter().for_each(|p| p.reset());
        self.keys_hint.store(0, Ordering::SeqCst);
    }

    pub fn get_partition(&self, key: &[u8]) -> &Partition {
        let n = murmur3::murmur3_x64_128(&mut Cursor::new(key), 0).unwrap_or_default();
        &self.partitions[(n % self.partitions.len() as u128) as usize]
    }

    pub fn entry(&self, key: &[u8]) -> Option<Arc<Entry>> {
        self.get_partition(key).entry(key)
    }

    pub fn write(&self, key: &[u8], values: Values) -> Result<()> {
        let p = self.get_partition(key);
        let is_new = p.entry(key).is_none();
        p.write(key, values)?;
        if is_new {
            self.keys_hint.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn add(&self, key: Vec<u8>, entry: Arc<Entry>) {
        self.get_partition(key.as_slice()).add(key, entry);
        self.keys_hint.fetch_add(1, Ordering::SeqCst);
    }

    pub fn remove(&self, key: &[u8]) -> Option<Arc<Entry>> {
        let removed = self.get_partition(key).remove(key);
        if removed.is_some() && self.keys_hint.load(Ordering::SeqCst) > 0 {
            self.keys_hint.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn keys(&self, sorted: bool) -> Vec<Vec<u8>> {
        let mut keys = Vec::with_capacity(self.keys_hint.load(Ordering::SeqCst) as usize);
        for p in &self.partitions {
            p.keys(|key| {
                keys.push(key.to_vec());
            })
        }

        if sorted {
            keys.sort()
        }

        keys
    }

    /// count returns the number of values in the ring.
    pub fn count(&self) -> usize {
        self.partitions.iter().map(|p| p.count()).sum()
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn apply<F>(&self, mut f: F)
    where
        F: FnMut(&[u8], &Arc<Entry>),
    {
        for p in &self.partitions {
            p.each(&mut f);
        }
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self {
            keys_hint: AtomicU64::new(0),
            partitions: (0..PARTITIONS).map(|_| Partition::new()).collect(),
        }
    }
}
