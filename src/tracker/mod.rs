//! Usage tracker: encodes hits and hands them to a background delivery worker.
//!
//! ```text
//! track_event() ──▶ Session::hit_params() ──▶ PendingQueue ──▶ DeliveryWorker ──▶ HTTP GET
//!   (caller)            (pure encode)          (FIFO)          (own thread)
//! ```

pub mod hit;
pub mod queue;
pub mod session;
pub mod transport;
pub mod worker;

pub use hit::{EventHit, Hit, HitType, Params, TimingHit, NO_VALUE};
pub use queue::{OverflowPolicy, QueueConfig};
pub use session::{random_client_id, Session, SessionOptions, TrackerError, PROTOCOL_VERSION};
pub use transport::{
    DeliveryError, HttpTransport, Transport, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT,
};
pub use worker::WorkerState;

use crate::config::Config;
use crate::stats::{create_shared_stats, SharedDeliveryStats};
use queue::PendingQueue;
use reqwest::Url;
use std::time::Duration;
use worker::DeliveryWorker;

/// A tracking session with its own delivery worker.
///
/// Tracking calls never block on the network. Dropping the tracker lets the
/// worker drain the queue in the background; [`Tracker::close`] waits for it.
pub struct Tracker {
    session: Session,
    queue: PendingQueue,
    worker: DeliveryWorker,
    stats: SharedDeliveryStats,
}

impl Tracker {
    /// Create a tracker posting to the default endpoint.
    pub fn new(
        tracking_id: impl Into<String>,
        client_id: Option<String>,
        options: SessionOptions,
    ) -> Result<Self, TrackerError> {
        TrackerBuilder::new(tracking_id)
            .client_id(client_id)
            .options(options)
            .build()
    }

    pub fn builder(tracking_id: impl Into<String>) -> TrackerBuilder {
        TrackerBuilder::new(tracking_id)
    }

    /// Create a tracker from saved configuration.
    pub fn from_config(config: &Config) -> Result<Self, TrackerError> {
        TrackerBuilder::from_config(config).build()
    }

    /// Track an event. `value` is only sent when greater than [`NO_VALUE`].
    pub fn track_event(&self, category: &str, action: &str, label: Option<&str>, value: i64) {
        let mut event = EventHit::new(category, action).with_value(value);
        if let Some(label) = label {
            event = event.with_label(label);
        }
        self.track(event);
    }

    /// Track a user timing. The label defaults to `<category>.<variable>`.
    pub fn track_user_timing(
        &self,
        category: &str,
        variable: &str,
        duration_ms: u64,
        label: Option<&str>,
    ) {
        let mut timing = TimingHit::new(category, variable, duration_ms);
        if let Some(label) = label {
            timing = timing.with_label(label);
        }
        self.track(timing);
    }

    /// Encode and enqueue any hit.
    pub fn track(&self, hit: impl Into<Hit>) {
        let params = self.session.hit_params(&hit.into());
        self.queue.push(params);
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn tracking_id(&self) -> &str {
        self.session.tracking_id()
    }

    pub fn client_id(&self) -> &str {
        self.session.client_id()
    }

    pub fn stats(&self) -> &SharedDeliveryStats {
        &self.stats
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    /// Hits tracked but not yet delivered, failed or dropped.
    pub fn pending(&self) -> usize {
        self.queue.outstanding()
    }

    /// Wait until every hit tracked so far has been handled.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout)
    }

    /// Stop accepting hits, let the worker drain the queue and join it.
    pub fn close(mut self) {
        self.queue.close();
        self.worker.join();
    }
}

/// Builder for [`Tracker`] with delivery settings.
pub struct TrackerBuilder {
    tracking_id: String,
    client_id: Option<String>,
    options: SessionOptions,
    endpoint: String,
    timeout: Duration,
    queue: QueueConfig,
    transport: Option<Box<dyn Transport>>,
    stats: Option<SharedDeliveryStats>,
}

impl TrackerBuilder {
    pub fn new(tracking_id: impl Into<String>) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            client_id: None,
            options: SessionOptions::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            queue: QueueConfig::default(),
            transport: None,
            stats: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tracking_id.clone().unwrap_or_default())
            .client_id(config.client_id.clone())
            .options(config.session.clone())
            .endpoint(config.endpoint.clone())
            .timeout(config.request_timeout)
            .queue(config.queue.clone())
    }

    pub fn client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Per-request timeout for the default HTTP transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Replace the HTTP transport.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Share externally owned stats, e.g. persisted ones.
    pub fn stats(mut self, stats: SharedDeliveryStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Build the session and start the delivery worker.
    pub fn build(self) -> Result<Tracker, TrackerError> {
        let session = Session::new(self.tracking_id, self.client_id, self.options)?;

        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| TrackerError::Startup(format!("Invalid endpoint '{}': {e}", self.endpoint)))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(
                HttpTransport::new(self.timeout).map_err(|e| TrackerError::Startup(e.to_string()))?,
            ),
        };

        let stats = self.stats.unwrap_or_else(create_shared_stats);
        let (queue, receiver) = queue::channel(&self.queue, stats.clone());
        let worker = DeliveryWorker::spawn(receiver, endpoint, transport, stats.clone())?;

        tracing::debug!(
            "Tracker started for {} (client {})",
            session.tracking_id(),
            session.client_id()
        );

        Ok(Tracker {
            session,
            queue,
            worker,
            stats,
        })
    }
}
