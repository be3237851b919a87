use std::fmt::{Display, Formatter};

mod compactor;
mod planner;

pub use compactor::Compactor;
pub use planner::{CompactionGroup, CompactionKind, Planner, MAX_LEVEL};

/// CompactionState is the phase a shard's compaction is in. A compaction can only be
/// cancelled before it reaches Publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionState {
    #[default]
    Idle,
    Planning,
    Merging,
    Publishing,
}

impl Display for CompactionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompactionState::Idle => "idle",
            CompactionState::Planning => "planning",
            CompactionState::Merging => "merging",
            CompactionState::Publishing => "publishing",
        };
        write!(f, "{}", s)
    }
}
