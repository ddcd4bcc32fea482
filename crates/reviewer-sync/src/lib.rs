pub mod error;
pub mod types;

pub mod clock;
pub mod config;
pub mod dirty;
pub mod migrate;
pub mod reactive;
pub mod realtime;
pub mod repository;
pub mod storage;
pub mod sync;

pub use error::{ReviewerError, Result};
