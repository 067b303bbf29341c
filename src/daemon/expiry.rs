//! TTL expiry registry.
//!
//! Tracks the last-touch instant per station. Owned and mutated only by the
//! executor thread; eviction runs on the same thread via the sweep ticker,
//! so touch/expire interleavings are totally ordered by the queue.

use std::collections::BTreeMap;

use crate::core::StationId;

#[derive(Debug, Default)]
pub struct ExpiryRegistry {
    touched: BTreeMap<StationId, u64>,
}

impl ExpiryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful write for the station at `now_ms`.
    pub fn touch(&mut self, station: &StationId, now_ms: u64) {
        self.touched.insert(station.clone(), now_ms);
    }

    pub fn remove(&mut self, station: &StationId) {
        self.touched.remove(station);
    }

    pub fn len(&self) -> usize {
        self.touched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    /// Stations whose last touch is older than `ttl_ms` at `now_ms`.
    pub fn expired(&self, now_ms: u64, ttl_ms: u64) -> Vec<StationId> {
        self.touched
            .iter()
            .filter(|(_, touched)| now_ms.saturating_sub(**touched) > ttl_ms)
            .map(|(station, _)| station.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> StationId {
        StationId::parse(s).expect("test id")
    }

    #[test]
    fn expired_respects_ttl_boundary() {
        let mut registry = ExpiryRegistry::new();
        registry.touch(&id("a"), 1_000);
        registry.touch(&id("b"), 2_000);

        // a is exactly at the ttl boundary, b is inside it.
        assert!(registry.expired(31_000, 30_000).is_empty());
        assert_eq!(registry.expired(31_001, 30_000), vec![id("a")]);
        assert_eq!(registry.expired(40_000, 5_000), vec![id("a"), id("b")]);
    }

    #[test]
    fn touch_refreshes_deadline() {
        let mut registry = ExpiryRegistry::new();
        registry.touch(&id("a"), 1_000);
        registry.touch(&id("a"), 50_000);
        assert!(registry.expired(60_000, 30_000).is_empty());
    }

    #[test]
    fn remove_forgets_station() {
        let mut registry = ExpiryRegistry::new();
        registry.touch(&id("a"), 0);
        registry.remove(&id("a"));
        assert!(registry.is_empty());
        assert!(registry.expired(u64::MAX, 0).is_empty());
    }
}
