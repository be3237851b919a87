use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::tsm1::file_store::stat::FileStat;

/// MAX_LEVEL is the level from which files are only merged by a full compaction.
pub const MAX_LEVEL: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    /// merges a run of adjacent files of the same level.
    Level(u64),
    /// merges every file of a shard that stopped receiving writes.
    Full,
    /// rewrites a single file without its tombstoned data.
    Tombstone,
}

impl Display for CompactionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionKind::Level(level) => write!(f, "level {}", level),
            CompactionKind::Full => write!(f, "full"),
            CompactionKind::Tombstone => write!(f, "tombstone"),
        }
    }
}

/// CompactionGroup is a set of files to be merged into one output, ordered oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionGroup {
    pub kind: CompactionKind,
    pub files: Vec<PathBuf>,
}

/// Planner decides which files of a shard to compact next. It only looks at file stats, so a
/// plan is cheap to compute and easy to test.
#[derive(Debug, Clone)]
pub struct Planner {
    min_files: usize,
    full_write_cold_duration: Duration,
}

impl Planner {
    pub fn new(min_files: usize, full_write_cold_duration: Duration) -> Self {
        Self {
            min_files: min_files.max(2),
            full_write_cold_duration,
        }
    }

    /// plan returns the next group to compact, if any. `stats` are sorted by generation then
    /// sequence inside the planner; `since_last_write` is how long the shard has been cold.
    pub fn plan(&self, stats: &[FileStat], since_last_write: Duration) -> Option<CompactionGroup> {
        let mut stats = stats.to_vec();
        stats.sort_by_key(|s| (s.generation, s.sequence));

        self.plan_full(&stats, since_last_write)
            .or_else(|| self.plan_level(&stats))
            .or_else(|| self.plan_tombstone(&stats))
    }

    fn plan_full(&self, stats: &[FileStat], since_last_write: Duration) -> Option<CompactionGroup> {
        if stats.len() < 2 || since_last_write < self.full_write_cold_duration {
            return None;
        }

        Some(CompactionGroup {
            kind: CompactionKind::Full,
            files: stats.iter().map(|s| s.path.clone()).collect(),
        })
    }

    /// plan_level picks the first run of min_files adjacent files sharing a level below
    /// MAX_LEVEL. Only adjacent files may be merged, otherwise the output would overtake a
    /// newer file sitting between two inputs.
    fn plan_level(&self, stats: &[FileStat]) -> Option<CompactionGroup> {
        let mut start = 0;
        while start < stats.len() {
            let level = stats[start].level();
            let mut end = start + 1;
            while end < stats.len() && stats[end].level() == level {
                end += 1;
            }

            if level < MAX_LEVEL && end - start >= self.min_files {
                return Some(CompactionGroup {
                    kind: CompactionKind::Level(level),
                    files: stats[start..start + self.min_files]
                        .iter()
                        .map(|s| s.path.clone())
                        .collect(),
                });
            }
            start = end;
        }
        None
    }

    fn plan_tombstone(&self, stats: &[FileStat]) -> Option<CompactionGroup> {
        stats
            .iter()
            .find(|s| s.has_tombstone)
            .map(|s| CompactionGroup {
                kind: CompactionKind::Tombstone,
                files: vec![s.path.clone()],
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tsm1::file_store::{tsm_file_name, KeyRange, TimeRange};

    use super::*;

    fn stat(generation: u64, sequence: u64) -> FileStat {
        FileStat {
            path: PathBuf::from(tsm_file_name(generation, sequence)),
            generation,
            sequence,
            has_tombstone: false,
            size: 1024,
            last_modified: 0,
            time_range: TimeRange::new(0, 10),
            key_range: KeyRange::new(b"a".to_vec(), b"z".to_vec()),
        }
    }

    fn paths(stats: &[FileStat]) -> Vec<PathBuf> {
        stats.iter().map(|s| s.path.clone()).collect()
    }

    #[test]
    fn test_plan_level() {
        let planner = Planner::new(4, Duration::from_secs(3600));
        let hot = Duration::ZERO;

        let stats: Vec<_> = (1..=3).map(|g| stat(g, 1)).collect();
        assert_eq!(planner.plan(&stats, hot), None);

        // a level 2 file breaks the run of level 1 files
        let mut stats = vec![stat(1, 1), stat(2, 1), stat(3, 2)];
        stats.extend((4..=8).map(|g| stat(g, 1)));
        let group = planner.plan(&stats, hot).unwrap();
        assert_eq!(group.kind, CompactionKind::Level(1));
        assert_eq!(group.files, paths(&stats[3..7]));

        // files at the max level are left to full compactions
        let stats: Vec<_> = (1..=5).map(|g| stat(g, MAX_LEVEL)).collect();
        assert_eq!(planner.plan(&stats, hot), None);
    }

    #[test]
    fn test_plan_full_when_cold() {
        let planner = Planner::new(4, Duration::from_secs(3600));
        let stats = vec![stat(2, 1), stat(1, 3)];

        assert_eq!(planner.plan(&stats, Duration::from_secs(60)), None);

        let group = planner.plan(&stats, Duration::from_secs(3600)).unwrap();
        assert_eq!(group.kind, CompactionKind::Full);
        assert_eq!(group.files, vec![stats[1].path.clone(), stats[0].path.clone()]);

        assert_eq!(planner.plan(&stats[..1], Duration::from_secs(7200)), None);
    }

    #[test]
    fn test_plan_tombstone() {
        let planner = Planner::new(4, Duration::from_secs(3600));
        let mut stats = vec![stat(1, 2), stat(2, 1)];
        stats[1].has_tombstone = true;

        let group = planner.plan(&stats, Duration::ZERO).unwrap();
        assert_eq!(group.kind, CompactionKind::Tombstone);
        assert_eq!(group.files, vec![stats[1].path.clone()]);
    }
}
