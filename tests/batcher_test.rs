//! Tests for the continuous batcher: window collection, parameter
//! partitioning, ordering, timeouts, and statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use mimir::batcher::{Batcher, BatcherConfig};
use mimir::inference::SharedInference;
use mimir::types::GenerationParams;
use mimir::{InferenceEngine, MimirError, Result};

/// Engine that records call order and can be slowed down or failed.
struct MockEngine {
    calls: AtomicUsize,
    call_log: Mutex<Vec<String>>,
    delay: Duration,
    slow_prompt: Option<(&'static str, Duration)>,
    fail_on: Option<&'static str>,
}

impl MockEngine {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            call_log: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            slow_prompt: None,
            fail_on: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn slow_on(mut self, needle: &'static str, delay: Duration) -> Self {
        self.slow_prompt = Some((needle, delay));
        self
    }

    fn failing_on(mut self, needle: &'static str) -> Self {
        self.fail_on = Some(needle);
        self
    }

    fn log(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    fn is_loaded(&self) -> bool {
        true
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_log.lock().unwrap().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((needle, delay)) = self.slow_prompt {
            if prompt.contains(needle) {
                tokio::time::sleep(delay).await;
            }
        }
        if let Some(needle) = self.fail_on {
            if prompt.contains(needle) {
                return Err(MimirError::InferenceFailed("mock failure".into()));
            }
        }
        Ok(format!("out: {prompt}"))
    }
}

fn quick_config() -> BatcherConfig {
    BatcherConfig::new()
        .window(Duration::from_millis(50))
        .request_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn single_request_resolves() {
    let engine = Arc::new(MockEngine::new());
    let batcher = Batcher::start(SharedInference::new(engine), quick_config());

    let out = batcher.submit("hello", GenerationParams::default()).await.unwrap();
    assert_eq!(out, "out: hello");
}

#[tokio::test]
async fn four_identical_requests_form_one_batch() {
    let engine = Arc::new(MockEngine::new());
    let batcher = Arc::new(Batcher::start(
        SharedInference::new(engine.clone()),
        quick_config(),
    ));

    let params = GenerationParams::default();
    let mut handles = Vec::new();
    for i in 0..4 {
        let batcher = Arc::clone(&batcher);
        handles.push(tokio::spawn(async move {
            batcher.submit(&format!("req {i}"), params).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(engine.calls.load(Ordering::SeqCst), 4);
    let stats = batcher.stats();
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.total_batches, 1, "one window should cover all four");
    assert_eq!(stats.queue_size, 0);
}

#[tokio::test]
async fn equal_params_preserve_arrival_order() {
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(5)));
    let batcher = Arc::new(Batcher::start(
        SharedInference::new(engine.clone()),
        quick_config(),
    ));

    let params = GenerationParams::default();
    let mut handles = Vec::new();
    for name in ["first", "second", "third"] {
        let batcher = Arc::clone(&batcher);
        handles.push(tokio::spawn(async move { batcher.submit(name, params).await }));
        // Give each submission time to enqueue before the next.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(engine.log(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn different_params_split_partitions_and_isolate_failures() {
    let engine = Arc::new(MockEngine::new().failing_on("poison"));
    let batcher = Arc::new(Batcher::start(
        SharedInference::new(engine.clone()),
        quick_config(),
    ));

    let hot = GenerationParams::default().temperature(0.9);
    let cold = GenerationParams::default().temperature(0.1);

    let b = Arc::clone(&batcher);
    let failing = tokio::spawn(async move { b.submit("poison pill", hot).await });
    let b = Arc::clone(&batcher);
    let healthy = tokio::spawn(async move { b.submit("fine request", cold).await });

    let failed = failing.await.unwrap();
    assert!(matches!(failed, Err(MimirError::InferenceFailed(_))));

    // The sibling with different params is unaffected.
    assert_eq!(healthy.await.unwrap().unwrap(), "out: fine request");
}

#[tokio::test]
async fn partition_error_resolves_followers_with_same_error() {
    let engine = Arc::new(MockEngine::new().failing_on("poison"));
    let batcher = Arc::new(Batcher::start(
        SharedInference::new(engine.clone()),
        quick_config(),
    ));

    let params = GenerationParams::default();
    let b = Arc::clone(&batcher);
    let first = tokio::spawn(async move { b.submit("poison pill", params).await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = Arc::clone(&batcher);
    let second = tokio::spawn(async move { b.submit("behind the failure", params).await });

    assert!(matches!(
        first.await.unwrap(),
        Err(MimirError::InferenceFailed(_))
    ));
    assert!(matches!(
        second.await.unwrap(),
        Err(MimirError::InferenceFailed(_))
    ));
    // The follower never reached the primitive.
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_inference_times_out_the_waiter() {
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(500)));
    let config = BatcherConfig::new()
        .window(Duration::from_millis(10))
        .request_timeout(Duration::from_millis(50));
    let batcher = Batcher::start(SharedInference::new(engine), config);

    let result = batcher.submit("slow", GenerationParams::default()).await;
    assert!(matches!(result, Err(MimirError::QueueTimeout { .. })));
}

#[tokio::test]
async fn scheduler_survives_timeouts_and_keeps_serving() {
    let engine = Arc::new(MockEngine::new().slow_on("too slow", Duration::from_millis(300)));
    let config = BatcherConfig::new()
        .window(Duration::from_millis(10))
        .request_timeout(Duration::from_millis(80));
    let batcher = Batcher::start(SharedInference::new(engine.clone()), config);

    let timed_out = batcher.submit("too slow", GenerationParams::default()).await;
    assert!(matches!(timed_out, Err(MimirError::QueueTimeout { .. })));

    // Let the abandoned inference drain, then the scheduler serves
    // the next request normally.
    tokio::time::sleep(Duration::from_millis(350)).await;
    let again = batcher
        .submit("second attempt", GenerationParams::default())
        .await
        .unwrap();
    assert_eq!(again, "out: second attempt");
}

#[tokio::test]
async fn stats_average_batch_size() {
    let engine = Arc::new(MockEngine::new());
    let batcher = Batcher::start(SharedInference::new(engine), quick_config());

    batcher.submit("a", GenerationParams::default()).await.unwrap();
    batcher.submit("b", GenerationParams::default()).await.unwrap();

    let stats = batcher.stats();
    assert_eq!(stats.total_requests, 2);
    assert!(stats.total_batches >= 1);
    assert!(stats.avg_batch_size >= 1.0);
}
