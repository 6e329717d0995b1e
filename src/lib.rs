//! Usage Tracker - anonymous usage statistics over the measurement protocol.
//!
//! Hits (events and user timings) are encoded on the caller's thread and
//! handed to a single background worker, which sends them one at a time as
//! HTTP GET requests to a collection endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Usage Tracker                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────────┐    │
//! │  │   Session   │──▶│   Pending   │──▶│ Delivery worker  │──▶ HTTP GET
//! │  │  (encode)   │   │ queue (FIFO)│   │  (own thread)    │    │
//! │  └─────────────┘   └─────────────┘   └──────────────────┘    │
//! │                                              │                │
//! │                                              ▼                │
//! │                                      ┌──────────────┐        │
//! │                                      │ Delivery     │        │
//! │                                      │ stats        │        │
//! │                                      └──────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use usage_tracker::{SessionOptions, Tracker, NO_VALUE};
//!
//! let tracker = Tracker::new("UA-XXXX-Y", None, SessionOptions::default())
//!     .expect("Failed to start tracker");
//!
//! // Returns immediately, delivery happens in the background
//! tracker.track_event("button", "press", Some("channel 23"), NO_VALUE);
//! tracker.track_user_timing("render", "paint", 250, None);
//!
//! tracker.close();
//! ```

pub mod config;
pub mod stats;
pub mod tracker;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use stats::{DeliveryStats, SharedDeliveryStats, StatsSnapshot};
pub use tracker::{
    DeliveryError, EventHit, Hit, HttpTransport, OverflowPolicy, Params, QueueConfig, Session,
    SessionOptions, TimingHit, Tracker, TrackerBuilder, TrackerError, Transport, WorkerState,
    NO_VALUE,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║               USAGE TRACKER - PRIVACY DECLARATION                ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This tool reports anonymous usage statistics.                   ║
║                                                                  ║
║  ✓ WHAT IS SENT WITH EVERY HIT:                                  ║
║    • The tracking id of the destination property                 ║
║    • A random client id, generated once per install              ║
║    • The event category, action, label and value you record      ║
║    • Optionally: language, document encoding, anonymize-IP flag  ║
║                                                                  ║
║  ✗ WHAT IS NEVER SENT:                                           ║
║    • Device serial numbers, hostnames or hardware ids            ║
║    • Anything you did not pass to a tracking call                ║
║                                                                  ║
║  Undelivered hits are never stored or retried.                   ║
║                                                                  ║
║  You can view delivery statistics anytime with:                  ║
║    usage-tracker status                                          ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_declaration_contents() {
        assert!(PRIVACY_DECLARATION.contains("PRIVACY"));
        assert!(PRIVACY_DECLARATION.contains("NEVER SENT"));
        assert!(PRIVACY_DECLARATION.contains("client id"));
    }
}
