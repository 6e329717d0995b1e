//! Delivery statistics.
//!
//! Counts what happened to every hit handed to a tracker, without storing
//! any hit content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Delivery counters for one tracker.
#[derive(Debug)]
pub struct DeliveryStats {
    /// Hits accepted by the tracker
    enqueued: AtomicU64,
    /// Hits the collector answered with a 2xx
    delivered: AtomicU64,
    /// Hits lost to network or server errors
    failed: AtomicU64,
    /// Hits discarded by the queue overflow policy
    dropped: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that accumulate across runs in a JSON file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous delivery stats: {}", e);
        }

        stats
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Delivery Statistics:\n\
             - Hits enqueued: {}\n\
             - Hits delivered: {}\n\
             - Hits failed: {}\n\
             - Hits dropped: {}\n\
             - Session duration: {} seconds",
            stats.enqueued,
            stats.delivered,
            stats.failed,
            stats.dropped,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk, if persistence is enabled.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                enqueued: stats.enqueued,
                delivered: stats.delivered,
                failed: stats.failed,
                dropped: stats.dropped,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.enqueued.store(persisted.enqueued, Ordering::Relaxed);
                self.delivered.store(persisted.delivered, Ordering::Relaxed);
                self.failed.store(persisted.failed, Ordering::Relaxed);
                self.dropped.store(persisted.dropped, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    enqueued: u64,
    delivered: u64,
    failed: u64,
    dropped: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared delivery stats.
pub type SharedDeliveryStats = Arc<DeliveryStats>;

pub fn create_shared_stats() -> SharedDeliveryStats {
    Arc::new(DeliveryStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedDeliveryStats {
    Arc::new(DeliveryStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = DeliveryStats::new();

        stats.record_enqueued();
        stats.record_enqueued();
        stats.record_delivered();
        stats.record_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.enqueued, 2);
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(snapshot.dropped, 1);
    }

    #[test]
    fn test_summary_format() {
        let summary = DeliveryStats::new().summary();
        assert!(summary.contains("Hits enqueued: 0"));
        assert!(summary.contains("Hits dropped"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("usage-tracker-stats-{}", uuid::Uuid::new_v4()))
            .join("delivery.json");

        let stats = DeliveryStats::with_persistence(path.clone());
        stats.record_enqueued();
        stats.record_failed();
        stats.save().unwrap();

        let reloaded = DeliveryStats::with_persistence(path.clone());
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.enqueued, 1);
        assert_eq!(snapshot.failed, 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
