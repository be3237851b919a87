mod tsm_writer;

pub use tsm_writer::{write_tsm_file, DefaultTSMWriter, TSMWriter};
