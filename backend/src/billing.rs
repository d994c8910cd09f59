//! Billing hand-off.
//!
//! Handlers never wait on billing. Each slice produces a [`BillingEntry`]
//! that is pushed onto a bounded queue with `try_send`; a full queue drops
//! the entry and counts it. A worker thread drains the queue and offers each
//! entry to the configured billers in order until one accepts it, retrying
//! transient failures with exponential backoff.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, warn};
use wire::{ConnectionType, PlatformType, RouteType};

use crate::error::BillingError;
use crate::metrics::{Counter, Metrics};
use crate::pricing::Nibblins;

/// One slice of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingEntry {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub session_id: u64,
    pub user_hash: u64,
    pub datacenter_id: u64,
    pub slice_number: u32,
    pub platform_type: PlatformType,
    pub connection_type: ConnectionType,
    pub route_type: RouteType,
    pub route_relay_ids: Vec<u64>,
    pub relay_prices: Vec<Nibblins>,
    pub route_price: Nibblins,
    pub envelope_bytes_up: u64,
    pub envelope_bytes_down: u64,
    pub direct_rtt: f32,
    pub direct_jitter: f32,
    pub direct_packet_loss: f32,
    pub next_rtt: f32,
    pub next_jitter: f32,
    pub next_packet_loss: f32,
    pub fallback_to_direct: bool,
    pub fallback_flags: u32,
    pub tags: Vec<u64>,
}

/// Downstream consumer of billing entries.
pub trait Biller: Send + Sync {
    fn bill(&self, entry: &BillingEntry) -> Result<(), BillingError>;
}

/// Budget for retrying an entry the billers could not take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Producer side, cloned into every handler.
#[derive(Debug, Clone)]
pub struct BillingQueue {
    sender: Sender<BillingEntry>,
    metrics: Arc<Metrics>,
}

impl BillingQueue {
    /// Enqueues without blocking.
    pub fn submit(&self, entry: BillingEntry) -> Result<(), BillingError> {
        match self.sender.try_send(entry) {
            Ok(()) => {
                self.metrics.increment(Counter::BillingQueued);
                Ok(())
            }
            Err(TrySendError::Full(entry)) => {
                self.metrics.increment(Counter::BillingQueueFull);
                warn!(
                    session_id = entry.session_id,
                    slice = entry.slice_number,
                    "billing queue full, dropping entry"
                );
                Err(BillingError::QueueFull)
            }
            Err(TrySendError::Disconnected(entry)) => {
                self.metrics.increment(Counter::BillingFailed);
                warn!(
                    session_id = entry.session_id,
                    slice = entry.slice_number,
                    "billing worker gone, dropping entry"
                );
                Err(BillingError::Disconnected)
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

/// Consumer side. Runs until every [`BillingQueue`] clone is dropped.
pub struct BillingWorker {
    receiver: Receiver<BillingEntry>,
    billers: Vec<Arc<dyn Biller>>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
}

/// Creates a queue of `capacity` entries and the worker that drains it.
#[must_use]
pub fn billing_channel(
    capacity: usize,
    billers: Vec<Arc<dyn Biller>>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
) -> (BillingQueue, BillingWorker) {
    let (sender, receiver) = bounded(capacity);
    (
        BillingQueue {
            sender,
            metrics: Arc::clone(&metrics),
        },
        BillingWorker {
            receiver,
            billers,
            policy,
            metrics,
        },
    )
}

impl BillingWorker {
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("billing".into())
            .spawn(move || self.run())
    }

    pub fn run(self) {
        for entry in &self.receiver {
            // failures are counted and logged inside
            let _ = self.deliver(&entry);
        }
        debug!("billing queue closed, worker exiting");
    }

    /// Delivers one entry, retrying within the policy's budget.
    pub fn deliver(&self, entry: &BillingEntry) -> Result<(), BillingError> {
        let mut attempt = 0;
        loop {
            match self.offer(entry) {
                Ok(()) => {
                    self.metrics.increment(Counter::BillingSucceeded);
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    self.metrics.increment(Counter::BillingRetried);
                    debug!(session_id = entry.session_id, attempt, error = %err, "retrying billing entry");
                    thread::sleep(self.policy.backoff(attempt));
                    attempt += 1;
                }
                Err(err) => {
                    self.metrics.increment(Counter::BillingFailed);
                    warn!(
                        session_id = entry.session_id,
                        slice = entry.slice_number,
                        error = %err,
                        "billing entry dropped"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// First biller to accept wins; otherwise the last error is returned.
    fn offer(&self, entry: &BillingEntry) -> Result<(), BillingError> {
        let mut result = Ok(());
        for biller in &self.billers {
            result = biller.bill(entry);
            if result.is_ok() {
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn entry(session_id: u64) -> BillingEntry {
        BillingEntry {
            timestamp: 0,
            buyer_id: 1,
            session_id,
            user_hash: 0,
            datacenter_id: 2,
            slice_number: 1,
            platform_type: PlatformType::default(),
            connection_type: ConnectionType::default(),
            route_type: RouteType::Direct,
            route_relay_ids: Vec::new(),
            relay_prices: Vec::new(),
            route_price: Nibblins::ZERO,
            envelope_bytes_up: 0,
            envelope_bytes_down: 0,
            direct_rtt: 0.0,
            direct_jitter: 0.0,
            direct_packet_loss: 0.0,
            next_rtt: 0.0,
            next_jitter: 0.0,
            next_packet_loss: 0.0,
            fallback_to_direct: false,
            fallback_flags: 0,
            tags: Vec::new(),
        }
    }

    /// Fails the first `failures` calls with `error`, then accepts.
    struct Flaky {
        failures: Mutex<u32>,
        error: BillingError,
        billed: Mutex<Vec<u64>>,
    }

    impl Flaky {
        fn new(failures: u32, error: BillingError) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                error,
                billed: Mutex::new(Vec::new()),
            })
        }
    }

    impl Biller for Flaky {
        fn bill(&self, entry: &BillingEntry) -> Result<(), BillingError> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(self.error.clone());
            }
            self.billed.lock().push(entry.session_id);
            Ok(())
        }
    }

    fn worker(billers: Vec<Arc<dyn Biller>>, retries: u32) -> (BillingQueue, BillingWorker, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let (queue, worker) =
            billing_channel(2, billers, RetryPolicy::immediate(retries), Arc::clone(&metrics));
        (queue, worker, metrics)
    }

    #[test]
    fn full_queue_is_counted_drop() {
        let (queue, _worker, metrics) = worker(Vec::new(), 0);
        queue.submit(entry(1)).unwrap();
        queue.submit(entry(2)).unwrap();
        assert_eq!(queue.submit(entry(3)), Err(BillingError::QueueFull));
        assert_eq!(metrics.get(Counter::BillingQueued), 2);
        assert_eq!(metrics.get(Counter::BillingQueueFull), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn submit_after_worker_exit_is_counted_failure() {
        let (queue, worker, metrics) = worker(Vec::new(), 0);
        drop(worker);
        assert_eq!(queue.submit(entry(1)), Err(BillingError::Disconnected));
        assert_eq!(metrics.get(Counter::BillingFailed), 1);
        assert_eq!(metrics.get(Counter::BillingQueued), 0);
    }

    #[test]
    fn transient_failures_are_retried() {
        let biller = Flaky::new(2, BillingError::Unavailable("down".into()));
        let (_queue, worker, metrics) = worker(vec![biller.clone() as Arc<dyn Biller>], 3);
        worker.deliver(&entry(7)).unwrap();
        assert_eq!(*biller.billed.lock(), vec![7]);
        assert_eq!(metrics.get(Counter::BillingRetried), 2);
        assert_eq!(metrics.get(Counter::BillingSucceeded), 1);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let biller = Flaky::new(10, BillingError::Unavailable("down".into()));
        let (_queue, worker, metrics) = worker(vec![biller as Arc<dyn Biller>], 2);
        assert!(worker.deliver(&entry(7)).is_err());
        assert_eq!(metrics.get(Counter::BillingRetried), 2);
        assert_eq!(metrics.get(Counter::BillingFailed), 1);
    }

    #[test]
    fn rejected_entries_are_not_retried() {
        let biller = Flaky::new(1, BillingError::Rejected("bad".into()));
        let (_queue, worker, metrics) = worker(vec![biller as Arc<dyn Biller>], 5);
        assert!(worker.deliver(&entry(7)).is_err());
        assert_eq!(metrics.get(Counter::BillingRetried), 0);
    }

    #[test]
    fn first_success_wins() {
        let failing = Flaky::new(u32::MAX, BillingError::Rejected("no".into()));
        let backup = Flaky::new(0, BillingError::Rejected("unused".into()));
        let (_queue, worker, _metrics) = worker(vec![failing as Arc<dyn Biller>, backup.clone()], 0);
        worker.deliver(&entry(9)).unwrap();
        assert_eq!(*backup.billed.lock(), vec![9]);
    }

    #[test]
    fn worker_drains_queue_until_closed() {
        let biller = Flaky::new(0, BillingError::Rejected("unused".into()));
        let (queue, worker, metrics) = worker(vec![biller.clone() as Arc<dyn Biller>], 0);
        let handle = worker.spawn().unwrap();
        queue.submit(entry(1)).unwrap();
        queue.submit(entry(2)).unwrap();
        drop(queue);
        handle.join().unwrap();
        assert_eq!(*biller.billed.lock(), vec![1, 2]);
        assert_eq!(metrics.get(Counter::BillingSucceeded), 2);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(50));
        assert_eq!(policy.backoff(40), Duration::from_millis(50));
    }
}
