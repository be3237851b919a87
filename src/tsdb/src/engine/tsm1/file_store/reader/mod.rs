pub mod block_iterator;
pub mod index_reader;
pub mod tsm_reader;

pub use block_iterator::{Block, BlockIterator};
pub use index_reader::TSMIndex;
pub use tsm_reader::{DefaultTSMReader, TSMReader};
