use std::path::Path;

use bytes::Buf;

use crate::engine::tsm1::block::block_type_name;
use crate::engine::tsm1::file_store::index::{IndexEntries, IndexEntry};
use crate::engine::tsm1::file_store::{
    KeyRange, TimeRange, HEADER_SIZE, INDEX_COUNT_SIZE, INDEX_ENTRY_SIZE, INDEX_KEY_LEN_SIZE,
    INDEX_TYPE_SIZE,
};
use crate::error::{invalid_format, Result};

/// TSMIndex represent the index section of a TSM file.  The index records all
/// blocks, their locations, sizes, min and max times. It is fully loaded in memory.
#[derive(Debug, Default)]
pub struct TSMIndex {
    keys: Vec<(Vec<u8>, IndexEntries)>,
    time_range: Option<TimeRange>,
}

impl TSMIndex {
    /// parse decodes the index section `b`. Block descriptors must point into the data section
    /// `[HEADER_SIZE, index_offset)` and keys must be strictly ascending.
    pub fn parse(path: &Path, mut b: &[u8], index_offset: u64) -> Result<Self> {
        let err = |reason: String| invalid_format(path, reason);

        let mut keys: Vec<(Vec<u8>, IndexEntries)> = vec![];
        let mut time_range: Option<TimeRange> = None;

        while b.has_remaining() {
            if b.remaining() < INDEX_KEY_LEN_SIZE {
                return Err(err("truncated index key length".to_string()));
            }
            let key_len = b.get_u16() as usize;
            if b.remaining() < key_len + INDEX_TYPE_SIZE + INDEX_COUNT_SIZE {
                return Err(err("truncated index key".to_string()));
            }
            let key = b[..key_len].to_vec();
            b.advance(key_len);

            if let Some((last, _)) = keys.last() {
                if last.as_slice() >= key.as_slice() {
                    return Err(err(format!(
                        "index keys out of order: {} after {}",
                        String::from_utf8_lossy(&key),
                        String::from_utf8_lossy(last)
                    )));
                }
            }

            let typ = b.get_u8();
            if block_type_name(typ) == "unknown" {
                return Err(err(format!("unknown block type {} in index", typ)));
            }

            let count = b.get_u16() as usize;
            if count == 0 {
                return Err(err(format!(
                    "no blocks for key {} in index",
                    String::from_utf8_lossy(&key)
                )));
            }
            if b.remaining() < count * INDEX_ENTRY_SIZE {
                return Err(err("truncated index entries".to_string()));
            }

            let mut entries = IndexEntries::new(typ);
            for _ in 0..count {
                let entry = IndexEntry::unmarshal_binary(&b[..INDEX_ENTRY_SIZE])
                    .map_err(|e| err(e.to_string()))?;
                b.advance(INDEX_ENTRY_SIZE);

                let end = entry.offset.checked_add(entry.size as u64);
                if entry.offset < HEADER_SIZE as u64 || end.map(|x| x > index_offset).unwrap_or(true)
                {
                    return Err(err(format!(
                        "block at offset {} size {} outside of data section",
                        entry.offset, entry.size
                    )));
                }
                if entry.min_time > entry.max_time {
                    return Err(err(format!(
                        "block at offset {} has min time {} after max time {}",
                        entry.offset, entry.min_time, entry.max_time
                    )));
                }

                time_range = Some(match time_range {
                    Some(r) => TimeRange::new(r.min.min(entry.min_time), r.max.max(entry.max_time)),
                    None => entry.time_range(),
                });
                entries.push(entry);
            }

            keys.push((key, entries));
        }

        if keys.is_empty() {
            return Err(err("empty index".to_string()));
        }

        Ok(Self { keys, time_range })
    }

    /// key_count returns the count of unique keys in the index.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// key_at returns the key in the index at the given position.
    pub fn key_at(&self, idx: usize) -> Option<(&[u8], u8)> {
        self.keys
            .get(idx)
            .map(|(key, entries)| (key.as_slice(), entries.typ))
    }

    pub fn entries_at(&self, idx: usize) -> Option<(&[u8], &IndexEntries)> {
        self.keys.get(idx).map(|(key, entries)| (key.as_slice(), entries))
    }

    /// search returns the position of key in the index.
    pub fn search(&self, key: &[u8]) -> Option<usize> {
        self.keys.binary_search_by(|(k, _)| k.as_slice().cmp(key)).ok()
    }

    /// seek returns the position of the first key >= key.
    pub fn seek(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|(k, _)| k.as_slice() < key)
    }

    pub fn entries(&self, key: &[u8]) -> Option<&IndexEntries> {
        self.search(key).map(|i| &self.keys[i].1)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.search(key).is_some()
    }

    /// time_range returns the min and max time across all keys in the file.
    pub fn time_range(&self) -> TimeRange {
        self.time_range.unwrap_or_else(|| TimeRange::new(0, 0))
    }

    /// key_range returns the min and max keys in the file.
    pub fn key_range(&self) -> KeyRange {
        match (self.keys.first(), self.keys.last()) {
            (Some((min, _)), Some((max, _))) => KeyRange::new(min.clone(), max.clone()),
            _ => KeyRange::default(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.keys.iter().map(|(_, e)| e.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use bytes::BufMut;

    use crate::error::Error;

    use super::*;

    fn index_bytes(keys: Vec<(&[u8], Vec<IndexEntry>)>) -> Vec<u8> {
        let mut b = vec![];
        for (key, entries) in &keys {
            b.put_u16(key.len() as u16);
            b.put_slice(key);
            b.put_u8(0);
            b.put_u16(entries.len() as u16);
            for e in entries.iter() {
                e.append_to(&mut b);
            }
        }
        b
    }

    #[test]
    fn test_parse_index() {
        let b = index_bytes(vec![
            (b"cpu".as_slice(), vec![IndexEntry::new(1, 5, 5, 10, 1), IndexEntry::new(6, 9, 15, 10, 2)]),
            (b"mem".as_slice(), vec![IndexEntry::new(-3, 2, 25, 10, 3)]),
        ]);
        let idx = TSMIndex::parse(&PathBuf::from("x.tsm"), &b, 35).unwrap();

        assert_eq!(idx.key_count(), 2);
        assert_eq!(idx.key_at(1), Some((b"mem".as_slice(), 0)));
        assert_eq!(idx.key_at(2), None);
        assert_eq!(idx.entries(b"cpu").unwrap().len(), 2);
        assert!(idx.entries(b"disk").is_none());
        assert_eq!(idx.seek(b"disk"), 1);
        assert_eq!(idx.time_range(), TimeRange::new(-3, 9));
        assert_eq!(idx.key_range(), KeyRange::new(b"cpu".to_vec(), b"mem".to_vec()));
        assert_eq!(idx.block_count(), 3);
    }

    #[test]
    fn test_parse_index_invalid() {
        let path = PathBuf::from("x.tsm");

        let unsorted = index_bytes(vec![
            (b"mem".as_slice(), vec![IndexEntry::new(1, 5, 5, 10, 1)]),
            (b"cpu".as_slice(), vec![IndexEntry::new(1, 5, 15, 10, 1)]),
        ]);
        assert!(matches!(
            TSMIndex::parse(&path, &unsorted, 25),
            Err(Error::InvalidFormat { .. })
        ));

        let outside = index_bytes(vec![(b"cpu".as_slice(), vec![IndexEntry::new(1, 5, 5, 100, 1)])]);
        assert!(TSMIndex::parse(&path, &outside, 25).is_err());

        let ok = index_bytes(vec![(b"cpu".as_slice(), vec![IndexEntry::new(1, 5, 5, 10, 1)])]);
        for n in 1..ok.len() {
            assert!(TSMIndex::parse(&path, &ok[..n], 25).is_err(), "truncated at {}", n);
        }

        assert!(TSMIndex::parse(&path, &[], 25).is_err());
    }
}
