//! Background delivery worker.
//!
//! One dedicated thread per tracker. It blocks on the queue, sends one hit,
//! logs the outcome and moves on. Failed hits are never retried.

use crate::stats::SharedDeliveryStats;
use crate::tracker::queue::QueueReceiver;
use crate::tracker::session::TrackerError;
use crate::tracker::transport::{request_url, Transport};
use reqwest::Url;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Worker state, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting on an empty queue
    Idle,
    /// One request in flight
    Sending,
    /// Queue closed and drained
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Sending,
            _ => WorkerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Sending => 1,
            WorkerState::Stopped => 2,
        }
    }
}

/// Handle to the delivery thread.
pub struct DeliveryWorker {
    state: Arc<AtomicU8>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DeliveryWorker {
    /// Start the delivery thread.
    pub fn spawn(
        receiver: QueueReceiver,
        endpoint: Url,
        mut transport: Box<dyn Transport>,
        stats: SharedDeliveryStats,
    ) -> Result<Self, TrackerError> {
        let state = Arc::new(AtomicU8::new(WorkerState::Idle.as_u8()));
        let thread_state = state.clone();

        let handle = thread::Builder::new()
            .name("usage-tracker-delivery".to_string())
            .spawn(move || {
                run_delivery_loop(&receiver, &endpoint, transport.as_mut(), &stats, &thread_state);
                thread_state.store(WorkerState::Stopped.as_u8(), Ordering::SeqCst);
                tracing::debug!("Delivery worker stopped");
            })
            .map_err(|e| TrackerError::Startup(format!("Failed to spawn worker: {e}")))?;

        Ok(Self {
            state,
            thread_handle: Some(handle),
        })
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Wait for the thread to exit. The queue must already be closed.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Delivery worker panicked");
            }
        }
    }
}

fn run_delivery_loop(
    receiver: &QueueReceiver,
    endpoint: &Url,
    transport: &mut dyn Transport,
    stats: &SharedDeliveryStats,
    state: &AtomicU8,
) {
    while let Some(params) = receiver.recv() {
        state.store(WorkerState::Sending.as_u8(), Ordering::SeqCst);

        tracing::debug!("Hit params: {:?}", params);
        let url = request_url(endpoint, &params);
        tracing::debug!("Request: {}", url);

        match transport.send(&url) {
            Ok(status) => {
                tracing::debug!("Hit delivered ({})", status);
                stats.record_delivered();
            }
            Err(e) => {
                tracing::warn!("Hit delivery failed: {}", e);
                stats.record_failed();
            }
        }

        state.store(WorkerState::Idle.as_u8(), Ordering::SeqCst);
        receiver.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_shared_stats;
    use crate::tracker::hit::Params;
    use crate::tracker::queue::{channel, QueueConfig};
    use crate::tracker::transport::DeliveryError;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FailEvery {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for FailEvery {
        fn send(&mut self, url: &Url) -> Result<u16, DeliveryError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(url.query().unwrap_or_default().to_string());
            if sent.len() % 2 == 0 {
                Err(DeliveryError::Server { status: 500 })
            } else {
                Ok(200)
            }
        }
    }

    #[test]
    fn test_failures_do_not_stop_the_loop() {
        let stats = create_shared_stats();
        let (mut queue, receiver) = channel(&QueueConfig::default(), stats.clone());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Box::new(FailEvery { sent: sent.clone() });
        let endpoint = Url::parse("http://localhost/collect").unwrap();

        let mut worker = DeliveryWorker::spawn(receiver, endpoint, transport, stats.clone()).unwrap();

        for n in 0..4 {
            let mut params = Params::new();
            params.insert("ev".to_string(), n.to_string());
            queue.push(params);
        }
        assert!(queue.wait_idle(Duration::from_secs(5)));

        queue.close();
        worker.join();

        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(*sent.lock().unwrap(), vec!["ev=0", "ev=1", "ev=2", "ev=3"]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.delivered, 2);
        assert_eq!(snapshot.failed, 2);
    }
}
