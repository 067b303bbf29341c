#![forbid(unsafe_code)]

pub mod cli;
pub mod client;
pub mod config;
pub mod core;
pub mod daemon;
pub mod error;
mod paths;
pub mod proto;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{FieldKind, Fields, LamportClock, StationId, StationRecord};
