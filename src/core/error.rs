use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid station id {raw:?}: {reason}")]
    InvalidStationId { raw: String, reason: String },
}
