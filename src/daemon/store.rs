//! Durable per-station store.
//!
//! One file per producer identity under `<data_dir>/stations/`, holding the
//! record's `field:value` lines (the pre-codec textual form). An in-memory
//! mirror backs reads; the executor thread is the sole writer, so the store
//! itself needs no locking.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::{Fields, StationId, StationRecord};

/// Durable unit file extension; recovery recognizes units by it.
const UNIT_EXT: &str = "station";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create stations dir {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to persist station {station}: {source}")]
    Persist {
        station: StationId,
        source: std::io::Error,
    },
    #[error("failed to delete station {station}: {source}")]
    Delete {
        station: StationId,
        source: std::io::Error,
    },
    #[error("failed to scan stations dir {path}: {source}")]
    Scan {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

pub struct StationStore {
    root: PathBuf,
    records: BTreeMap<StationId, StationRecord>,
}

impl StationStore {
    /// Open (and create if missing) the stations directory.
    pub fn open(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root).map_err(|source| StoreError::CreateDir {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self {
            root,
            records: BTreeMap::new(),
        })
    }

    fn unit_path(&self, station: &StationId) -> PathBuf {
        self.root.join(format!("{station}.{UNIT_EXT}"))
    }

    pub fn get(&self, station: &StationId) -> Option<&StationRecord> {
        self.records.get(station)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merge fields into the station's record, creating it if absent.
    ///
    /// The merged view is computed fully in memory and written to a temp
    /// file that is renamed over the unit, so a persistence failure leaves
    /// the prior durable state untouched and the in-memory mirror unchanged.
    pub fn upsert(
        &mut self,
        station: &StationId,
        incoming: Fields,
        now_ms: u64,
    ) -> Result<UpsertOutcome, StoreError> {
        let (merged, outcome) = match self.records.get(station) {
            Some(existing) => {
                let mut record = existing.clone();
                record.merge(incoming, now_ms);
                (record, UpsertOutcome::Updated)
            }
            None => (
                StationRecord::new(station.clone(), incoming, now_ms),
                UpsertOutcome::Created,
            ),
        };

        self.persist(station, &merged.fields)?;
        self.records.insert(station.clone(), merged);
        Ok(outcome)
    }

    fn persist(&self, station: &StationId, fields: &Fields) -> Result<(), StoreError> {
        let mut contents = String::new();
        for (name, value) in fields {
            contents.push_str(name);
            contents.push(':');
            contents.push_str(value);
            contents.push('\n');
        }

        let path = self.unit_path(station);
        let tmp = path.with_extension(format!("{UNIT_EXT}.tmp"));
        fs::write(&tmp, contents.as_bytes())
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|source| StoreError::Persist {
                station: station.clone(),
                source,
            })
    }

    /// Identity of the record with the newest touch time.
    pub fn most_recently_touched(&self) -> Option<StationId> {
        self.records
            .values()
            .max_by_key(|record| record.touched_ms)
            .map(|record| record.station.clone())
    }

    /// Drop the record and its durable unit. Missing files are fine: the
    /// sweep may race a concurrent manual cleanup.
    pub fn delete(&mut self, station: &StationId) -> Result<(), StoreError> {
        self.records.remove(station);
        match fs::remove_file(self.unit_path(station)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Delete {
                station: station.clone(),
                source,
            }),
        }
    }

    /// Startup scan: load every surviving durable unit, treating it as
    /// touched now. Unreadable or oddly-named files are skipped with a
    /// warning rather than failing recovery.
    pub fn recover(&mut self, now_ms: u64) -> Result<Vec<StationId>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|source| StoreError::Scan {
            path: self.root.display().to_string(),
            source,
        })?;

        let mut recovered = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("skipping unreadable dir entry during recovery: {err}");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(UNIT_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let station = match StationId::parse(stem) {
                Ok(station) => station,
                Err(err) => {
                    tracing::warn!("skipping unit with invalid name: {err}");
                    continue;
                }
            };
            let contents = match fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(err) => {
                    tracing::warn!("skipping unreadable unit {}: {err}", path.display());
                    continue;
                }
            };

            let fields = parse_unit(&contents);
            self.records.insert(
                station.clone(),
                StationRecord::new(station.clone(), fields, now_ms),
            );
            recovered.push(station);
        }
        Ok(recovered)
    }
}

fn parse_unit(contents: &str) -> Fields {
    let mut fields = Fields::new();
    for line in contents.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            fields.insert(name.to_string(), value.to_string());
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn id(s: &str) -> StationId {
        StationId::parse(s).expect("test id")
    }

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn first_upsert_creates_then_updates() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StationStore::open(dir.path().to_path_buf()).expect("open");

        let outcome = store
            .upsert(&id("a"), fields(&[("air_temp", "13")]), 1)
            .expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Created);

        let outcome = store
            .upsert(&id("a"), fields(&[("rel_hum", "60")]), 2)
            .expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Updated);

        let record = store.get(&id("a")).expect("record");
        assert_eq!(record.fields.len(), 2);
        assert_eq!(record.touched_ms, 2);
    }

    #[test]
    fn upsert_merges_rather_than_replaces_on_disk() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StationStore::open(dir.path().to_path_buf()).expect("open");
        store
            .upsert(&id("a"), fields(&[("air_temp", "13")]), 1)
            .expect("upsert");
        store
            .upsert(&id("a"), fields(&[("rel_hum", "60")]), 2)
            .expect("upsert");

        let on_disk =
            fs::read_to_string(dir.path().join("a.station")).expect("read unit");
        assert!(on_disk.contains("air_temp:13"));
        assert!(on_disk.contains("rel_hum:60"));
    }

    #[test]
    fn most_recently_touched_tracks_touch_order() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StationStore::open(dir.path().to_path_buf()).expect("open");
        store
            .upsert(&id("a"), fields(&[("air_temp", "1")]), 10)
            .expect("upsert");
        store
            .upsert(&id("b"), fields(&[("air_temp", "2")]), 20)
            .expect("upsert");
        assert_eq!(store.most_recently_touched(), Some(id("b")));

        store
            .upsert(&id("a"), fields(&[("air_temp", "3")]), 30)
            .expect("upsert");
        assert_eq!(store.most_recently_touched(), Some(id("a")));
    }

    #[test]
    fn delete_removes_record_and_unit() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StationStore::open(dir.path().to_path_buf()).expect("open");
        store
            .upsert(&id("a"), fields(&[("air_temp", "1")]), 1)
            .expect("upsert");
        store.delete(&id("a")).expect("delete");
        assert!(store.get(&id("a")).is_none());
        assert!(!dir.path().join("a.station").exists());
        // Deleting again is a no-op.
        store.delete(&id("a")).expect("delete twice");
    }

    #[test]
    fn recover_reloads_units_touched_now() {
        let dir = TempDir::new().expect("tempdir");
        {
            let mut store = StationStore::open(dir.path().to_path_buf()).expect("open");
            store
                .upsert(&id("a"), fields(&[("air_temp", "13"), ("cloud", "Clear")]), 1)
                .expect("upsert");
        }

        let mut store = StationStore::open(dir.path().to_path_buf()).expect("reopen");
        let recovered = store.recover(99).expect("recover");
        assert_eq!(recovered, vec![id("a")]);
        let record = store.get(&id("a")).expect("record");
        assert_eq!(record.fields.get("cloud").map(String::as_str), Some("Clear"));
        assert_eq!(record.touched_ms, 99);
    }

    #[test]
    fn recover_skips_foreign_files() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("notes.txt"), "hello").expect("write");
        fs::write(dir.path().join("bad name!.station"), "x:y").expect("write");

        let mut store = StationStore::open(dir.path().to_path_buf()).expect("open");
        let recovered = store.recover(1).expect("recover");
        assert!(recovered.is_empty());
    }
}
