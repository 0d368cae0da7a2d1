use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::models::error::ValidationError;
use crate::models::location::{LocationRecord, Snapshot};

struct Entry {
    record: LocationRecord,
    written_at: Instant,
}

/// Last-write-wins store of the latest record per publisher.
///
/// Each key is guarded by its shard lock, so an upsert replaces the whole
/// record at once and readers never see a mix of old and new fields. Writes
/// for different publishers only contend when they hash to the same shard.
#[derive(Default)]
pub struct Registry {
    records: DashMap<String, Entry>,
    ever_written: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or fully replaces the record for `publisher_id`.
    pub fn upsert(
        &self,
        publisher_id: &str,
        record: LocationRecord,
    ) -> Result<(), ValidationError> {
        self.upsert_at(publisher_id, record, Instant::now())
    }

    pub fn upsert_at(
        &self,
        publisher_id: &str,
        record: LocationRecord,
        written_at: Instant,
    ) -> Result<(), ValidationError> {
        if publisher_id.is_empty() {
            return Err(ValidationError::EmptyPublisherId);
        }
        record.report().validate()?;

        self.ever_written.store(true, Ordering::Release);
        self.records.insert(publisher_id.to_string(), Entry { record, written_at });
        Ok(())
    }

    /// Copies out the current mapping. `None` means nobody has ever written,
    /// which is different from every record having been removed since.
    pub fn snapshot(&self) -> Option<Snapshot> {
        if !self.ever_written.load(Ordering::Acquire) {
            return None;
        }
        Some(
            self.records
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().record.clone()))
                .collect(),
        )
    }

    pub fn get(&self, publisher_id: &str) -> Option<LocationRecord> {
        self.records.get(publisher_id).map(|entry| entry.record.clone())
    }

    pub fn remove(&self, publisher_id: &str) -> Option<LocationRecord> {
        self.records.remove(publisher_id).map(|(_, entry)| entry.record)
    }

    /// Drops every record last written more than `ttl` before `now`.
    /// Returns the removed publisher ids.
    pub fn expire(&self, ttl: Duration, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        self.records.retain(|id, entry| {
            let keep = now.saturating_duration_since(entry.written_at) <= ttl;
            if !keep {
                debug!("Expiring location of {}", id);
                expired.push(id.clone());
            }
            keep
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Local;

    use super::*;
    use crate::models::location::PositionReport;

    fn record(id: &str, lat: f64, lng: f64, accuracy: f64) -> LocationRecord {
        LocationRecord::stamped(id, PositionReport::new(lat, lng, accuracy), Local::now())
    }

    #[test]
    fn snapshot_is_none_until_first_write() {
        let registry = Registry::new();
        assert!(registry.snapshot().is_none());

        registry.upsert("bus-1", record("bus-1", 15.3, 75.7, 8.0)).unwrap();
        registry.remove("bus-1");

        let snapshot = registry.snapshot().expect("written once");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn upsert_is_idempotent() {
        let registry = Registry::new();
        let r = record("bus-1", 15.3, 75.7, 8.0);
        registry.upsert("bus-1", r.clone()).unwrap();
        registry.upsert("bus-1", r.clone()).unwrap();

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("bus-1"), Some(&r));
    }

    #[test]
    fn last_write_wins() {
        let registry = Registry::new();
        registry.upsert("bus-1", record("bus-1", 1.0, 1.0, 1.0)).unwrap();
        registry.upsert("bus-1", record("bus-1", 2.0, 2.0, 20.0)).unwrap();
        let last = record("bus-1", 3.0, 4.0, 5.0);
        registry.upsert("bus-1", last.clone()).unwrap();

        assert_eq!(registry.snapshot().unwrap().get("bus-1"), Some(&last));
    }

    #[test]
    fn invalid_write_leaves_registry_untouched() {
        let registry = Registry::new();
        let good = record("bus-1", 15.3, 75.7, 8.0);
        registry.upsert("bus-1", good.clone()).unwrap();

        let mut bad = good.clone();
        bad.lat = f64::NAN;
        assert!(matches!(
            registry.upsert("bus-1", bad),
            Err(ValidationError::Latitude(_))
        ));
        assert_eq!(registry.get("bus-1"), Some(good));

        assert_eq!(
            registry.upsert("", record("", 1.0, 1.0, 1.0)),
            Err(ValidationError::EmptyPublisherId)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejected_first_write_keeps_empty_result() {
        let registry = Registry::new();
        let mut bad = record("bus-1", 0.0, 0.0, 0.0);
        bad.accuracy = -3.0;
        assert!(registry.upsert("bus-1", bad).is_err());
        assert!(registry.snapshot().is_none());
    }

    #[test]
    fn expire_removes_only_stale_records() {
        let registry = Registry::new();
        let start = Instant::now();
        registry.upsert_at("old", record("old", 1.0, 1.0, 1.0), start).unwrap();
        registry
            .upsert_at("fresh", record("fresh", 2.0, 2.0, 2.0), start + Duration::from_secs(50))
            .unwrap();

        let expired = registry.expire(Duration::from_secs(30), start + Duration::from_secs(60));
        assert_eq!(expired, vec!["old".to_string()]);

        let snapshot = registry.snapshot().unwrap();
        assert!(snapshot.contains("fresh"));
        assert!(!snapshot.contains("old"));
    }

    #[test]
    fn concurrent_writes_to_distinct_keys_never_tear() {
        let registry = Arc::new(Registry::new());

        let writers: Vec<_> = ["bus-1", "bus-2"]
            .into_iter()
            .map(|id| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..2_000 {
                        let v = (i % 90) as f64;
                        registry.upsert(id, record(id, v, v, v)).unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    if let Some(snapshot) = registry.snapshot() {
                        for (id, r) in snapshot.iter() {
                            assert_eq!(r.lat, r.lng, "torn record for {id}");
                            assert_eq!(r.lat, r.accuracy, "torn record for {id}");
                            assert_eq!(r.driver, id);
                        }
                    }
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn visible_record_implies_snapshot_exists() {
        let registry = Arc::new(Registry::new());

        let reader = {
            let registry = registry.clone();
            std::thread::spawn(move || loop {
                if registry.get("bus-1").is_some() {
                    assert!(registry.snapshot().is_some(), "record visible but no snapshot");
                    return;
                }
                std::hint::spin_loop();
            })
        };

        registry.upsert("bus-1", record("bus-1", 15.3, 75.7, 8.0)).unwrap();
        reader.join().unwrap();
    }
}
