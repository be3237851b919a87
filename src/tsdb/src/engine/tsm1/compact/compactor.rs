use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::tsm1::file_store::reader::{DefaultTSMReader, TSMReader};
use crate::engine::tsm1::file_store::writer::{DefaultTSMWriter, TSMWriter};
use crate::engine::tsm1::file_store::{tsm_file_name, TimeRange, MAX_TSMFILE_SIZE};
use crate::engine::tsm1::value::Values;
use crate::error::{invalid_format, Error, Result};

/// Compactor merges TSM files of a shard into new ones. It only writes the outputs, making
/// them visible is left to the caller.
pub struct Compactor {
    dir: PathBuf,
    max_points_per_block: usize,
}

impl Compactor {
    pub fn new(dir: impl AsRef<Path>, max_points_per_block: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_points_per_block,
        }
    }

    /// compact merges inputs, ordered oldest first, into files named after generation and
    /// starting at sequence. A newer input wins for equal timestamps and tombstoned points are
    /// dropped. On error or cancellation every output is discarded and the inputs are left
    /// untouched. An empty result means every point of the inputs was deleted.
    pub async fn compact(
        &self,
        inputs: &[Arc<DefaultTSMReader>],
        generation: u64,
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let mut outputs = vec![];
        match self
            .merge(inputs, generation, sequence, cancel, &mut outputs)
            .await
        {
            Ok(()) => Ok(outputs),
            Err(e) => {
                for path in &outputs {
                    if let Err(re) = tokio::fs::remove_file(path).await {
                        warn!("failed to remove compaction output {:?}: {}", path, re);
                    }
                }
                Err(e)
            }
        }
    }

    async fn merge(
        &self,
        inputs: &[Arc<DefaultTSMReader>],
        generation: u64,
        mut sequence: u64,
        cancel: &CancellationToken,
        outputs: &mut Vec<PathBuf>,
    ) -> Result<()> {
        // min-heap of (key, input, key position), one cursor per input
        let mut heap = BinaryHeap::with_capacity(inputs.len());
        for (i, r) in inputs.iter().enumerate() {
            if let Some((key, _)) = r.index().key_at(0) {
                heap.push(Reverse((key, i, 0usize)));
            }
        }

        let mut w: Option<DefaultTSMWriter> = None;
        while let Some(Reverse((key, i, pos))) = heap.pop() {
            if cancel.is_cancelled() {
                return Err(Error::CompactionAborted {
                    reason: "compaction cancelled".to_string(),
                });
            }

            let mut sources = vec![(i, pos)];
            while let Some(Reverse((next, _, _))) = heap.peek() {
                if *next != key {
                    break;
                }
                if let Some(Reverse((_, j, p))) = heap.pop() {
                    sources.push((j, p));
                }
            }
            for &(j, p) in &sources {
                if let Some((next, _)) = inputs[j].index().key_at(p + 1) {
                    heap.push(Reverse((next, j, p + 1)));
                }
            }
            sources.sort_unstable();

            let mut writer = match w.take() {
                Some(writer) => writer,
                None => DefaultTSMWriter::new(self.dir.join(tsm_file_name(generation, sequence))).await?,
            };

            self.merge_key(inputs, key, &sources, &mut writer).await?;

            if writer.size() > MAX_TSMFILE_SIZE {
                outputs.push(writer.close().await?);
                sequence += 1;
            } else {
                w = Some(writer);
            }
        }

        if let Some(mut writer) = w {
            match writer.write_index().await {
                Ok(()) => outputs.push(writer.close().await?),
                Err(Error::NoValues) => writer.remove().await?,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    async fn merge_key(
        &self,
        inputs: &[Arc<DefaultTSMReader>],
        key: &[u8],
        sources: &[(usize, usize)],
        writer: &mut DefaultTSMWriter,
    ) -> Result<()> {
        // A key held by a single file without tombstones keeps its blocks as they are.
        if let [(j, pos)] = sources {
            let r = &inputs[*j];
            if r.tombstone_range(key).is_empty() {
                let (_, entries) = r
                    .index()
                    .entries_at(*pos)
                    .ok_or_else(|| invalid_format(r.path(), "index position out of range"))?;
                for (block_index, entry) in entries.entries.iter().enumerate() {
                    let block = r.verify_block(key, block_index, entry)?;
                    writer
                        .write_block(key, entry.min_time, entry.max_time, block)
                        .await?;
                }
                return Ok(());
            }
        }

        let mut merged: Option<Values> = None;
        for (j, _) in sources {
            if let Some(v) = inputs[*j].read(key, TimeRange::unbound()).await? {
                merged = Some(match merged {
                    Some(m) => m.merge(v)?,
                    None => v,
                });
            }
        }

        if let Some(values) = merged {
            for chunk in values.chunks(self.max_points_per_block) {
                writer.write(key, &chunk).await?;
            }
        }
        Ok(())
    }
}
