//! Pending hit queue between producers and the delivery worker.
//!
//! Unbounded by default, so pushing never blocks. A capacity can be set
//! together with an [`OverflowPolicy`] deciding what gets discarded.

use crate::stats::SharedDeliveryStats;
use crate::tracker::hit::Params;
use crossbeam_channel::{bounded, unbounded, Receiver, SendTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// What to do when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued hit
    DropOldest,
    /// Discard the hit being pushed
    DropNewest,
    /// Wait for room, then discard the hit being pushed
    Block { timeout_ms: u64 },
}

/// Queue sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued hits; `None` means unbounded
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Only consulted when `capacity` is set
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::DropNewest,
        }
    }
}

impl QueueConfig {
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

/// Count of hits pushed but not yet delivered, failed or dropped.
///
/// The count itself is atomic. The mutex and condvar are only touched by
/// `wait_idle` callers, and by `done` when it reaches zero while someone waits.
#[derive(Debug, Default)]
pub(crate) struct Outstanding {
    count: AtomicUsize,
    waiters: AtomicUsize,
    lock: Mutex<()>,
    idle: Condvar,
}

impl Outstanding {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn done(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
        if previous == Ok(1) && self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            self.idle.notify_all();
        }
    }

    pub(crate) fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until nothing is outstanding. Returns `false` on timeout.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        if self.current() == 0 {
            return true;
        }
        let deadline = Instant::now().checked_add(timeout);

        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let idle = loop {
            if self.current() == 0 {
                break true;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    let (next, _) = self
                        .idle
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    guard = next;
                }
                None => {
                    guard = self.idle.wait(guard).unwrap_or_else(|e| e.into_inner());
                }
            }
        };
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        idle
    }
}

/// Producer side of the queue.
pub struct PendingQueue {
    sender: Option<Sender<Params>>,
    /// Held only for drop-oldest eviction
    evictor: Option<Receiver<Params>>,
    overflow: OverflowPolicy,
    outstanding: Arc<Outstanding>,
    stats: SharedDeliveryStats,
}

/// Consumer side of the queue, owned by the delivery worker.
pub struct QueueReceiver {
    receiver: Receiver<Params>,
    outstanding: Arc<Outstanding>,
}

/// Create a connected queue pair.
pub fn channel(config: &QueueConfig, stats: SharedDeliveryStats) -> (PendingQueue, QueueReceiver) {
    let (sender, receiver) = match config.capacity {
        Some(capacity) => bounded(capacity.max(1)),
        None => unbounded(),
    };
    let evictor = match (config.capacity, config.overflow) {
        (Some(_), OverflowPolicy::DropOldest) => Some(receiver.clone()),
        _ => None,
    };
    let outstanding = Arc::new(Outstanding::default());

    let queue = PendingQueue {
        sender: Some(sender),
        evictor,
        overflow: config.overflow,
        outstanding: outstanding.clone(),
        stats,
    };
    let receiver = QueueReceiver {
        receiver,
        outstanding,
    };
    (queue, receiver)
}

impl PendingQueue {
    /// Push encoded hit parameters. Returns `false` if the hit was discarded.
    pub fn push(&self, params: Params) -> bool {
        let Some(ref sender) = self.sender else {
            tracing::warn!("Tracker is closed, dropping hit");
            self.stats.record_dropped();
            return false;
        };

        self.stats.record_enqueued();
        self.outstanding.add();

        let rejected = match sender.try_send(params) {
            Ok(()) => return true,
            Err(TrySendError::Full(params)) => self.handle_full(sender, params),
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("Delivery worker is gone, dropping hit");
                true
            }
        };

        if rejected {
            self.discard();
        }
        !rejected
    }

    /// Apply the overflow policy. Returns `true` if `params` was rejected.
    fn handle_full(&self, sender: &Sender<Params>, mut params: Params) -> bool {
        match self.overflow {
            OverflowPolicy::DropNewest => {
                tracing::warn!("Hit queue full, dropping newest hit");
                true
            }
            OverflowPolicy::Block { timeout_ms } => {
                match sender.send_timeout(params, Duration::from_millis(timeout_ms)) {
                    Ok(()) => false,
                    Err(SendTimeoutError::Timeout(_)) => {
                        tracing::warn!("Hit queue still full after {}ms, dropping hit", timeout_ms);
                        true
                    }
                    Err(SendTimeoutError::Disconnected(_)) => true,
                }
            }
            OverflowPolicy::DropOldest => loop {
                if let Some(ref evictor) = self.evictor {
                    if evictor.try_recv().is_ok() {
                        tracing::warn!("Hit queue full, dropping oldest hit");
                        self.discard();
                    }
                }
                match sender.try_send(params) {
                    Ok(()) => return false,
                    Err(TrySendError::Full(back)) => params = back,
                    Err(TrySendError::Disconnected(_)) => return true,
                }
            },
        }
    }

    fn discard(&self) {
        self.stats.record_dropped();
        self.outstanding.done();
    }

    /// Hits pushed and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.outstanding.current()
    }

    /// Wait until every pushed hit is delivered, failed or dropped.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.outstanding.wait_idle(timeout)
    }

    /// Disconnect the producer side. The worker drains what is queued.
    pub fn close(&mut self) {
        self.sender = None;
        self.evictor = None;
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }
}

impl QueueReceiver {
    /// Block until a hit is available. `None` once closed and drained.
    pub fn recv(&self) -> Option<Params> {
        self.receiver.recv().ok()
    }

    /// Mark one received hit as finished.
    pub fn done(&self) {
        self.outstanding.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_shared_stats;

    fn hit(n: usize) -> Params {
        let mut params = Params::new();
        params.insert("ev".to_string(), n.to_string());
        params
    }

    fn drain(receiver: &QueueReceiver, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| {
                let params = receiver.recv().unwrap();
                receiver.done();
                params["ev"].clone()
            })
            .collect()
    }

    #[test]
    fn test_unbounded_fifo() {
        let stats = create_shared_stats();
        let (queue, receiver) = channel(&QueueConfig::default(), stats.clone());

        for n in 0..100 {
            assert!(queue.push(hit(n)));
        }
        assert_eq!(queue.outstanding(), 100);

        let values = drain(&receiver, 100);
        let expected: Vec<String> = (0..100).map(|n| n.to_string()).collect();
        assert_eq!(values, expected);
        assert_eq!(queue.outstanding(), 0);
        assert_eq!(stats.snapshot().enqueued, 100);
    }

    #[test]
    fn test_drop_newest() {
        let stats = create_shared_stats();
        let config = QueueConfig::bounded(2, OverflowPolicy::DropNewest);
        let (queue, receiver) = channel(&config, stats.clone());

        assert!(queue.push(hit(0)));
        assert!(queue.push(hit(1)));
        assert!(!queue.push(hit(2)));

        assert_eq!(drain(&receiver, 2), vec!["0", "1"]);
        assert_eq!(stats.snapshot().dropped, 1);
        assert_eq!(queue.outstanding(), 0);
    }

    #[test]
    fn test_drop_oldest() {
        let stats = create_shared_stats();
        let config = QueueConfig::bounded(2, OverflowPolicy::DropOldest);
        let (queue, receiver) = channel(&config, stats.clone());

        assert!(queue.push(hit(0)));
        assert!(queue.push(hit(1)));
        assert!(queue.push(hit(2)));

        assert_eq!(drain(&receiver, 2), vec!["1", "2"]);
        assert_eq!(stats.snapshot().dropped, 1);
        assert_eq!(queue.outstanding(), 0);
    }

    #[test]
    fn test_block_with_timeout() {
        let stats = create_shared_stats();
        let config = QueueConfig::bounded(1, OverflowPolicy::Block { timeout_ms: 20 });
        let (queue, _receiver) = channel(&config, stats.clone());

        assert!(queue.push(hit(0)));
        let started = Instant::now();
        assert!(!queue.push(hit(1)));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(stats.snapshot().dropped, 1);
    }

    #[test]
    fn test_close_drains_then_ends() {
        let (mut queue, receiver) = channel(&QueueConfig::default(), create_shared_stats());
        queue.push(hit(0));
        queue.close();

        assert!(queue.is_closed());
        assert!(!queue.push(hit(1)));
        assert!(receiver.recv().is_some());
        assert!(receiver.recv().is_none());
    }

    #[test]
    fn test_wait_idle_times_out() {
        let (queue, _receiver) = channel(&QueueConfig::default(), create_shared_stats());
        queue.push(hit(0));
        assert!(!queue.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_idle_without_deadline() {
        let (queue, receiver) = channel(&QueueConfig::default(), create_shared_stats());
        queue.push(hit(0));
        queue.push(hit(1));

        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drain(&receiver, 2)
        });

        assert!(queue.wait_idle(Duration::MAX));
        assert_eq!(queue.outstanding(), 0);
        assert_eq!(worker.join().unwrap(), vec!["0", "1"]);
    }

    #[test]
    fn test_wait_idle_returns_at_once_when_empty() {
        let (queue, _receiver) = channel(&QueueConfig::default(), create_shared_stats());
        assert!(queue.wait_idle(Duration::ZERO));
    }

    #[test]
    fn test_outstanding_never_underflows() {
        let (queue, receiver) = channel(&QueueConfig::default(), create_shared_stats());
        receiver.done();
        assert_eq!(queue.outstanding(), 0);
        queue.push(hit(0));
        assert_eq!(queue.outstanding(), 1);
    }

    #[test]
    fn test_concurrent_pushes_are_all_counted() {
        let stats = create_shared_stats();
        let (queue, receiver) = channel(&QueueConfig::default(), stats.clone());
        let queue = Arc::new(queue);

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for n in 0..250 {
                        queue.push(hit(n));
                    }
                })
            })
            .collect();
        let consumer = std::thread::spawn(move || drain(&receiver, 1000).len());

        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.wait_idle(Duration::from_secs(10)));
        assert_eq!(consumer.join().unwrap(), 1000);
        assert_eq!(stats.snapshot().enqueued, 1000);
    }
}
