pub mod storage;
pub mod engine;
pub mod error;
