//! Core value types: identity, logical time, field schema, payload codec.

pub mod clock;
pub mod codec;
pub mod error;
pub mod record;
pub mod schema;
pub mod station;

pub use clock::LamportClock;
pub use codec::{decode, encode};
pub use error::CoreError;
pub use record::{Fields, StationRecord};
pub use schema::{FieldKind, field_kind, parses_as_number};
pub use station::StationId;
