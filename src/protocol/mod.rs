pub mod aurora;
pub mod engine;
pub mod error;
pub mod transport;
