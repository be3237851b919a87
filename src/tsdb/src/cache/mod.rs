#[allow(clippy::module_inception)]
mod cache;
mod partition;
mod ring;

pub use cache::{Cache, Entry};
pub use partition::Partition;
pub use ring::Ring;
