//! Daemon module - the aggregation engine.
//!
//! Provides:
//! - session admission and per-connection reader loops
//! - the serialized executor (single consumer of the request queue)
//! - the durable per-station store and its TTL expiry registry
//! - server wiring: bind retry, crash recovery, shutdown

pub mod executor;
pub mod expiry;
pub mod run;
pub mod session;
pub mod store;

pub use executor::{EngineMessage, RequestEnvelope, run_state_loop};
pub use expiry::ExpiryRegistry;
pub use run::{ServerError, ServerHandle, run_server, serve};
pub use session::{SessionRegistry, run_acceptor};
pub use store::{StationStore, StoreError, UpsertOutcome};

/// Wall-clock ms since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
