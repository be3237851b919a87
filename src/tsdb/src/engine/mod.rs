pub mod tsm1;

pub use tsm1::engine::Engine;
