pub mod block;
pub mod codec;
pub mod compact;
pub mod engine;
pub mod file_store;
pub mod value;
pub mod wal;
