//! Continuous request batching over the single inference primitive.
//!
//! A bounded request channel feeds one scheduler task. The scheduler
//! blocks for the first request, then collects more for a short window
//! (or until the batch cap), partitions the batch by exact
//! [`GenerationParams`] equality, and dispatches one worker per
//! partition. Partitions overlap each other on the shared inference
//! mutex; within a partition, members run sequentially in arrival
//! order, so equal-parameter requests are never reordered.
//!
//! Every request carries a one-shot result handle resolved exactly
//! once, and a deadline independent of the collection window: expire
//! while queued and the scheduler resolves the handle with a timeout
//! without ever invoking the primitive; expire during inference and the
//! call may finish but its result is dropped on the floor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error};
use uuid::Uuid;

use crate::inference::SharedInference;
use crate::telemetry;
use crate::types::GenerationParams;
use crate::{MimirError, Result};

/// Configuration for the continuous batcher.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Requests collected per window at most. Default: 4.
    pub max_batch_size: usize,
    /// Collection window length. Default: 100 ms.
    pub window: Duration,
    /// Per-request deadline covering queue wait and inference.
    /// Default: 30 s.
    pub request_timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 4,
            window: Duration::from_millis(100),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl BatcherConfig {
    /// Create a config with the defaults above.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-window request cap.
    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = n.max(1);
        self
    }

    /// Set the collection window.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the per-request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// One queued request. Created on enqueue, destroyed once its handle
/// resolves.
struct BatchRequest {
    request_id: Uuid,
    prompt: String,
    params: GenerationParams,
    enqueued_at: Instant,
    handle: oneshot::Sender<Result<String>>,
}

#[derive(Default)]
struct BatcherCounters {
    total_requests: AtomicU64,
    total_batches: AtomicU64,
    total_batch_time_ms: AtomicU64,
    queue_size: AtomicU64,
}

/// Batcher statistics, eventual-consistency reads of relaxed counters.
#[derive(Debug, Clone, Serialize)]
pub struct BatcherStats {
    pub total_requests: u64,
    pub total_batches: u64,
    pub avg_batch_size: f64,
    pub avg_batch_time_s: f64,
    pub queue_size: u64,
}

/// Concurrency-safe front door to the single inference primitive.
pub struct Batcher {
    tx: mpsc::Sender<BatchRequest>,
    config: BatcherConfig,
    counters: Arc<BatcherCounters>,
}

impl Batcher {
    /// Start the scheduler task and return its handle.
    ///
    /// The scheduler runs until the batcher is dropped (closing the
    /// request channel). Requires a tokio runtime context.
    pub fn start(inference: Arc<SharedInference>, config: BatcherConfig) -> Self {
        // Capacity 1: the channel is a rendezvous point, not a buffer.
        // Senders block until the scheduler takes their request, which
        // is what bounds the queue.
        let (tx, rx) = mpsc::channel(1);
        let counters = Arc::new(BatcherCounters::default());
        tokio::spawn(scheduler_loop(
            rx,
            inference,
            config.clone(),
            Arc::clone(&counters),
        ));
        Self {
            tx,
            config,
            counters,
        }
    }

    /// Enqueue a request and wait for its result.
    ///
    /// Blocks up to the request deadline for both queue admission and
    /// resolution; an expired deadline surfaces as `QueueTimeout`.
    pub async fn submit(&self, prompt: &str, params: GenerationParams) -> Result<String> {
        let (handle, rx) = oneshot::channel();
        let request = BatchRequest {
            request_id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            params,
            enqueued_at: Instant::now(),
            handle,
        };
        let request_id = request.request_id;
        let deadline = request.enqueued_at + self.config.request_timeout;

        match timeout_at(deadline, self.tx.send(request)).await {
            Err(_) => return Err(self.timeout_error()),
            Ok(Err(_)) => return Err(MimirError::SchedulerClosed),
            Ok(Ok(())) => {}
        }
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.counters.queue_size.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::BATCH_REQUESTS_TOTAL).increment(1);
        debug!(%request_id, "request enqueued");

        match timeout_at(deadline, rx).await {
            Err(_) => Err(self.timeout_error()),
            Ok(Err(_)) => Err(MimirError::SchedulerClosed),
            Ok(Ok(result)) => result,
        }
    }

    fn timeout_error(&self) -> MimirError {
        MimirError::QueueTimeout {
            seconds: self.config.request_timeout.as_secs(),
        }
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> BatcherStats {
        let requests = self.counters.total_requests.load(Ordering::Relaxed);
        let batches = self.counters.total_batches.load(Ordering::Relaxed);
        let time_ms = self.counters.total_batch_time_ms.load(Ordering::Relaxed);
        let avg = |num: f64, den: u64| if den > 0 { num / den as f64 } else { 0.0 };
        BatcherStats {
            total_requests: requests,
            total_batches: batches,
            avg_batch_size: avg(requests as f64, batches),
            avg_batch_time_s: avg(time_ms as f64 / 1000.0, batches),
            queue_size: self.counters.queue_size.load(Ordering::Relaxed),
        }
    }
}

/// Main scheduler: block for one request, widen into a batch, dispatch.
async fn scheduler_loop(
    mut rx: mpsc::Receiver<BatchRequest>,
    inference: Arc<SharedInference>,
    config: BatcherConfig,
    counters: Arc<BatcherCounters>,
) {
    debug!("batch scheduler started");
    while let Some(first) = rx.recv().await {
        counters.queue_size.fetch_sub(1, Ordering::Relaxed);
        let mut batch = vec![first];
        let window_end = Instant::now() + config.window;

        while batch.len() < config.max_batch_size {
            let now = Instant::now();
            if now >= window_end {
                break;
            }
            match timeout(window_end - now, rx.recv()).await {
                Ok(Some(request)) => {
                    counters.queue_size.fetch_sub(1, Ordering::Relaxed);
                    batch.push(request);
                }
                // Channel closed: dispatch what we have, then exit on
                // the next recv.
                Ok(None) => break,
                // Window elapsed.
                Err(_) => break,
            }
        }

        process_batch(batch, &inference, &config, &counters).await;
    }
    debug!("batch scheduler stopped");
}

async fn process_batch(
    batch: Vec<BatchRequest>,
    inference: &Arc<SharedInference>,
    config: &BatcherConfig,
    counters: &Arc<BatcherCounters>,
) {
    let size = batch.len();
    let started = Instant::now();
    counters.total_batches.fetch_add(1, Ordering::Relaxed);
    metrics::counter!(telemetry::BATCHES_TOTAL).increment(1);
    debug!(size, "processing batch");

    let partitions = partition_by_params(batch);
    let workers = partitions.into_iter().map(|group| {
        let inference = Arc::clone(inference);
        let timeout = config.request_timeout;
        tokio::spawn(process_partition(group, inference, timeout))
    });
    for worker in workers.collect::<Vec<_>>() {
        if let Err(e) = worker.await {
            error!(error = %e, "batch worker panicked");
        }
    }

    let elapsed = started.elapsed();
    counters
        .total_batch_time_ms
        .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    metrics::histogram!(telemetry::BATCH_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

/// Group by exact parameter equality, preserving arrival order inside
/// each group (and group order by first arrival).
fn partition_by_params(batch: Vec<BatchRequest>) -> Vec<Vec<BatchRequest>> {
    let mut partitions: Vec<(crate::types::ParamsKey, Vec<BatchRequest>)> = Vec::new();
    for request in batch {
        let key = request.params.key();
        match partitions.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.push(request),
            None => partitions.push((key, vec![request])),
        }
    }
    partitions.into_iter().map(|(_, group)| group).collect()
}

/// Run one partition's members sequentially in arrival order.
///
/// A member whose deadline expired while queued resolves with a timeout
/// and never reaches the primitive; a member whose waiter vanished is
/// dropped the same way. An inference error resolves the failing member
/// and every member still waiting behind it with the same error.
async fn process_partition(
    group: Vec<BatchRequest>,
    inference: Arc<SharedInference>,
    request_timeout: Duration,
) {
    let mut pending = group.into_iter();
    while let Some(request) = pending.next() {
        if request.enqueued_at.elapsed() >= request_timeout {
            debug!(request_id = %request.request_id, "expired in queue, skipping inference");
            let _ = request.handle.send(Err(MimirError::QueueTimeout {
                seconds: request_timeout.as_secs(),
            }));
            continue;
        }
        if request.handle.is_closed() {
            debug!(request_id = %request.request_id, "waiter cancelled, skipping inference");
            continue;
        }

        match inference.generate(&request.prompt, &request.params).await {
            Ok(response) => {
                // A failed send means the waiter timed out mid-inference;
                // the result is discarded, as contracted.
                let _ = request.handle.send(Ok(response));
            }
            Err(e) => {
                error!(request_id = %request.request_id, error = %e, "inference failed");
                let _ = request.handle.send(Err(e.clone()));
                for sibling in pending.by_ref() {
                    let _ = sibling.handle.send(Err(e.clone()));
                }
                return;
            }
        }
    }
}
