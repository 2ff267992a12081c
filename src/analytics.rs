//! Request analytics.
//!
//! Every resolution produces one [`AnalyticsEvent`]. Recording never blocks
//! or fails the caller: counters are bumped in place and the event itself is
//! handed to a background task over an unbounded channel. Tests and
//! shutdown paths call [`AnalyticsLog::flush`] to wait until everything sent
//! so far is visible.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum Outcome {
    Hit,
    Miss,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub source_lang: String,
    pub target_lang: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub confidence: Option<f64>,
    pub model_version: Option<String>,
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
    pub recorded_at: DateTime<Utc>,
}

fn as_millis<S: Serializer>(latency: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(latency.as_millis() as u64)
}

impl AnalyticsEvent {
    pub fn new(source_lang: &str, target_lang: &str, outcome: Outcome, latency: Duration) -> Self {
        Self {
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            outcome,
            confidence: None,
            model_version: None,
            latency,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_result(mut self, confidence: f64, model_version: &str) -> Self {
        self.confidence = Some(confidence);
        self.model_version = Some(model_version.to_string());
        self
    }
}

#[derive(Default)]
struct Counters {
    /// Requests served from the cache
    hits: AtomicUsize,

    /// Requests that needed a model inference
    misses: AtomicUsize,

    /// Requests that ended in an error
    failures: AtomicUsize,

    /// Model invocations, including failed ones
    inferences: AtomicUsize,
}

/// Snapshot of the request counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub hits: usize,
    pub misses: usize,
    pub failures: usize,
    pub inferences: usize,
    pub total_requests: usize,

    /// Cache hit rate over successful requests, as a percentage (0-100)
    pub cache_hit_rate: f64,

    /// Failure rate over all requests, as a percentage (0-100)
    pub failure_rate: f64,
}

/// Aggregated usage of one directed language pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PairStats {
    pub requests: usize,
    pub hits: usize,
    pub misses: usize,
    pub failures: usize,
    /// Mean confidence over requests that produced a translation
    pub mean_confidence: f64,
}

enum Command {
    Record(AnalyticsEvent),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct AnalyticsLog {
    sender: mpsc::UnboundedSender<Command>,
    counters: Arc<Counters>,
    events: Arc<RwLock<Vec<AnalyticsEvent>>>,
}

impl AnalyticsLog {
    /// Start the background writer. Must be called inside a Tokio runtime;
    /// the writer stops once every handle is dropped.
    pub fn spawn() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let events = Arc::new(RwLock::new(Vec::new()));

        let sink = Arc::clone(&events);
        tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                match command {
                    Command::Record(event) => sink.write().await.push(event),
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Analytics writer stopped");
        });

        Self {
            sender,
            counters: Arc::new(Counters::default()),
            events,
        }
    }

    /// Record an event without waiting for it to be stored.
    pub fn record(&self, event: AnalyticsEvent) {
        let counter = match event.outcome {
            Outcome::Hit => &self.counters.hits,
            Outcome::Miss => &self.counters.misses,
            Outcome::Failed(_) => &self.counters.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if self.sender.send(Command::Record(event)).is_err() {
            warn!("Analytics writer is gone, dropping event");
        }
    }

    /// Count one model invocation.
    pub fn record_inference(&self) {
        self.counters.inferences.fetch_add(1, Ordering::Relaxed);
    }

    /// Wait until every event recorded before this call has been stored.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn report(&self) -> MetricsReport {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let failures = self.counters.failures.load(Ordering::Relaxed);
        let inferences = self.counters.inferences.load(Ordering::Relaxed);
        let total_requests = hits + misses + failures;

        let served = hits + misses;
        let cache_hit_rate = if served > 0 {
            (hits as f64 / served as f64) * 100.0
        } else {
            0.0
        };
        let failure_rate = if total_requests > 0 {
            (failures as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            hits,
            misses,
            failures,
            inferences,
            total_requests,
            cache_hit_rate,
            failure_rate,
        }
    }

    /// All stored events, oldest first.
    pub async fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.read().await.clone()
    }

    /// Newest-first page of stored events.
    pub async fn recent(&self, limit: usize, offset: usize) -> Vec<AnalyticsEvent> {
        self.events
            .read()
            .await
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Per-pair usage, keyed by `(source_lang, target_lang)`.
    pub async fn pair_stats(&self) -> BTreeMap<(String, String), PairStats> {
        let events = self.events.read().await;
        let mut stats: BTreeMap<(String, String), PairStats> = BTreeMap::new();
        let mut confidence_sums: BTreeMap<(String, String), (f64, usize)> = BTreeMap::new();

        for event in events.iter() {
            let key = (event.source_lang.clone(), event.target_lang.clone());
            let entry = stats.entry(key.clone()).or_default();
            entry.requests += 1;
            match event.outcome {
                Outcome::Hit => entry.hits += 1,
                Outcome::Miss => entry.misses += 1,
                Outcome::Failed(_) => entry.failures += 1,
            }
            if let Some(confidence) = event.confidence {
                let sum = confidence_sums.entry(key).or_insert((0.0, 0));
                sum.0 += confidence;
                sum.1 += 1;
            }
        }

        for (key, (sum, count)) in confidence_sums {
            if let Some(entry) = stats.get_mut(&key) {
                entry.mean_confidence = sum / count as f64;
            }
        }
        stats
    }
}
