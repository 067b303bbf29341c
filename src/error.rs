use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::core::CoreError;
use crate::daemon::{ServerError, StoreError};
use crate::proto::ProtoError;

/// Crate-level convenience error.
///
/// A thin wrapper over the canonical capability errors; each subsystem keeps
/// its own error type and this only exists so binaries can carry one `Result`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),
}
