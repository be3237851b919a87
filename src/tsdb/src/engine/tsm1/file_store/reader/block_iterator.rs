use common_base::iterator::AsyncIterator;

use crate::engine::tsm1::file_store::index::IndexEntry;
use crate::engine::tsm1::file_store::reader::tsm_reader::DefaultTSMReader;

/// Block is one raw block of a TSM file as described by the index.
#[derive(Debug, Clone)]
pub struct Block<'a> {
    pub key: &'a [u8],
    /// position of the block among the blocks of key.
    pub block_index: usize,
    pub typ: u8,
    pub entry: IndexEntry,
    pub data: &'a [u8],
}

impl<'a> Block<'a> {
    pub fn min_time(&self) -> i64 {
        self.entry.min_time
    }

    pub fn max_time(&self) -> i64 {
        self.entry.max_time
    }

    /// checksum is the CRC-32 recorded in the index, it is not verified.
    pub fn checksum(&self) -> u32 {
        self.entry.checksum
    }
}

/// BlockIterator allows iterating over each block in a TSM file in order.  It provides
/// raw access to the block bytes without decoding them. The position advances before a
/// block is read, so a block that cannot be read is returned as an error and the next call
/// continues with the following block.
pub struct BlockIterator<'a> {
    r: &'a DefaultTSMReader,

    key_idx: usize,
    entry_idx: usize,
}

impl<'a> BlockIterator<'a> {
    pub(crate) fn new(r: &'a DefaultTSMReader) -> Self {
        Self {
            r,
            key_idx: 0,
            entry_idx: 0,
        }
    }

    fn next_position(&mut self) -> Option<(usize, usize)> {
        let index = self.r.index();
        while let Some((_, entries)) = index.entries_at(self.key_idx) {
            if self.entry_idx < entries.len() {
                let pos = (self.key_idx, self.entry_idx);
                self.entry_idx += 1;
                return Some(pos);
            }
            self.key_idx += 1;
            self.entry_idx = 0;
        }
        None
    }
}

#[async_trait]
impl<'a> AsyncIterator for BlockIterator<'a> {
    type Item = Block<'a>;

    async fn try_next(&mut self) -> anyhow::Result<Option<Self::Item>> {
        let (key_idx, entry_idx) = match self.next_position() {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let r: &'a DefaultTSMReader = self.r;
        let (key, entries) = r
            .index()
            .entries_at(key_idx)
            .ok_or_else(|| anyhow!("block iterator: key {} out of range", key_idx))?;
        let entry = entries.entries[entry_idx];
        let data = r.block_bytes(&entry)?;

        Ok(Some(Block {
            key,
            block_index: entry_idx,
            typ: entries.typ,
            entry,
            data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use common_base::iterator::AsyncIterator;

    use crate::engine::tsm1::block::{decode_block, verify};
    use crate::engine::tsm1::file_store::reader::tsm_reader::DefaultTSMReader;
    use crate::engine::tsm1::file_store::tsm_file_name;
    use crate::engine::tsm1::file_store::writer::write_tsm_file;
    use crate::engine::tsm1::value::{Value, Values};

    #[tokio::test]
    async fn test_block_iterator() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tsm_file(
            dir.as_ref().join(tsm_file_name(1, 1)),
            vec![
                (
                    b"cpu".to_vec(),
                    Values::Float((0..5).map(|i| Value::new(i, i as f64)).collect()),
                ),
                (
                    b"mem".to_vec(),
                    Values::Str(vec![Value::new(3, b"x".to_vec())]),
                ),
            ],
            2,
        )
        .await
        .unwrap();

        let r = DefaultTSMReader::open(&path).await.unwrap();

        for _ in 0..2 {
            let mut itr = r.block_iterator();
            let mut seen = vec![];
            let mut points = 0;
            while let Some(block) = itr.try_next().await.unwrap() {
                assert!(verify(block.data, block.checksum()));
                points += decode_block(block.data).unwrap().len();
                seen.push((block.key.to_vec(), block.block_index, block.typ));
            }

            assert_eq!(
                seen,
                vec![
                    (b"cpu".to_vec(), 0, 0),
                    (b"cpu".to_vec(), 1, 0),
                    (b"cpu".to_vec(), 2, 0),
                    (b"mem".to_vec(), 0, 3),
                ]
            );
            assert_eq!(points, 6);
        }
    }
}
