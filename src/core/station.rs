//! Station identity atom.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::CoreError;

/// Identity a participant supplies at handshake.
///
/// Doubles as the durable unit's file stem, so the alphabet is restricted to
/// ASCII alphanumerics plus `-` and `_`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.is_empty() {
            return Err(CoreError::InvalidStationId {
                raw: s.to_string(),
                reason: "empty".into(),
            });
        }
        for c in s.bytes() {
            if !(c.is_ascii_alphanumeric() || c == b'-' || c == b'_') {
                return Err(CoreError::InvalidStationId {
                    raw: s.to_string(),
                    reason: "contains character outside [A-Za-z0-9_-]".into(),
                });
            }
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StationId({:?})", self.0)
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
