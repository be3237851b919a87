use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut};
use tsmdb_utils::time::time_format_nano;

use crate::engine::tsm1::file_store::{TimeRange, INDEX_ENTRY_SIZE};

/// IndexEntry is the index information for a given block in a TSM file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// The min and max time of all points stored in the block.
    pub min_time: i64,
    pub max_time: i64,

    /// The absolute position in the file where this block is located.
    pub offset: u64,

    /// The size in bytes of the block in the file.
    pub size: u32,

    /// CRC-32 of the block bytes.
    pub checksum: u32,
}

impl IndexEntry {
    pub fn new(min_time: i64, max_time: i64, offset: u64, size: u32, checksum: u32) -> Self {
        Self {
            min_time,
            max_time,
            offset,
            size,
            checksum,
        }
    }

    /// unmarshal_binary decodes an IndexEntry from a byte slice.
    pub fn unmarshal_binary(mut b: &[u8]) -> anyhow::Result<Self> {
        if b.len() < INDEX_ENTRY_SIZE {
            return Err(anyhow!(
                "unmarshal_binary: short buf: {} < {}",
                b.len(),
                INDEX_ENTRY_SIZE
            ));
        }

        Ok(Self {
            min_time: b.get_i64(),
            max_time: b.get_i64(),
            offset: b.get_u64(),
            size: b.get_u32(),
            checksum: b.get_u32(),
        })
    }

    /// append_to writes a binary-encoded version of IndexEntry to b.
    pub fn append_to(&self, b: &mut Vec<u8>) {
        b.put_i64(self.min_time);
        b.put_i64(self.max_time);
        b.put_u64(self.offset);
        b.put_u32(self.size);
        b.put_u32(self.checksum);
    }

    /// contains returns true if this IndexEntry may contain values for the given time.
    /// The min and max times are inclusive.
    pub fn contains(&self, t: i64) -> bool {
        self.min_time <= t && self.max_time >= t
    }

    /// overlaps_time_range returns true if the given time ranges are completely within the entry's time bounds.
    pub fn overlaps_time_range(&self, min: i64, max: i64) -> bool {
        self.min_time <= max && self.max_time >= min
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.min_time, self.max_time)
    }
}

impl Display for IndexEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "min={} max={} ofs={} siz={} crc={:08x}",
            time_format_nano(self.min_time),
            time_format_nano(self.max_time),
            self.offset,
            self.size,
            self.checksum,
        )
    }
}

/// IndexEntries holds every block descriptor of one key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexEntries {
    pub typ: u8,
    pub entries: Vec<IndexEntry>,
}

impl IndexEntries {
    pub fn new(typ: u8) -> Self {
        Self {
            typ,
            entries: vec![],
        }
    }

    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn min_time(&self) -> i64 {
        self.entries.first().map(|e| e.min_time).unwrap_or_default()
    }

    pub fn max_time(&self) -> i64 {
        self.entries.last().map(|e| e.max_time).unwrap_or_default()
    }

    /// marshal_binary encodes the entries without the key, type and count prefix.
    pub fn marshal_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.entries.len() * INDEX_ENTRY_SIZE);
        for entry in &self.entries {
            entry.append_to(&mut buf);
        }
        buf
    }

    /// overlapping returns the position and descriptor of every block intersecting [min, max].
    pub fn overlapping(&self, min: i64, max: i64) -> impl Iterator<Item = (usize, &IndexEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.overlaps_time_range(min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_entry_binary() {
        let entry = IndexEntry::new(-5, 1_000, 5, 42, 0xDEADBEEF);
        let mut b = vec![];
        entry.append_to(&mut b);
        assert_eq!(b.len(), INDEX_ENTRY_SIZE);
        assert_eq!(&b[24..28], &42u32.to_be_bytes());
        assert_eq!(IndexEntry::unmarshal_binary(&b).unwrap(), entry);

        assert!(IndexEntry::unmarshal_binary(&b[..31]).is_err());
    }

    #[test]
    fn test_index_entries_overlapping() {
        let mut entries = IndexEntries::new(0);
        entries.push(IndexEntry::new(0, 9, 5, 10, 0));
        entries.push(IndexEntry::new(10, 19, 15, 10, 0));
        entries.push(IndexEntry::new(20, 29, 25, 10, 0));

        let got: Vec<usize> = entries.overlapping(9, 10).map(|(i, _)| i).collect();
        assert_eq!(got, vec![0, 1]);
        assert_eq!(entries.overlapping(30, 40).count(), 0);
        assert_eq!(entries.min_time(), 0);
        assert_eq!(entries.max_time(), 29);
        assert_eq!(entries.marshal_binary().len(), 3 * INDEX_ENTRY_SIZE);
    }
}
