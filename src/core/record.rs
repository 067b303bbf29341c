//! Per-station durable record.

use std::collections::BTreeMap;

use super::station::StationId;

/// Ordered field-name -> field-value mapping.
pub type Fields = BTreeMap<String, String>;

/// The durable per-identity unit: everything one producer has contributed,
/// merged across its uploads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationRecord {
    pub station: StationId,
    pub fields: Fields,
    /// Wall-clock ms of the last successful write.
    pub touched_ms: u64,
}

impl StationRecord {
    pub fn new(station: StationId, fields: Fields, touched_ms: u64) -> Self {
        Self {
            station,
            fields,
            touched_ms,
        }
    }

    /// Merge-by-key: incoming pairs overwrite same-named fields and extend
    /// the rest. Re-applying identical pairs is a content no-op.
    pub fn merge(&mut self, incoming: Fields, now_ms: u64) {
        self.fields.extend(incoming);
        self.touched_ms = now_ms;
    }
}
