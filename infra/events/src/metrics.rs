//! Metrics collaborator consumed by the hub.
//!
//! The hub only ever calls into a [`MetricsSink`]; exporting is left to whoever owns the
//! sink. [`AtomicMetrics`] keeps lock-free counters that an exporter reads synchronously via
//! [`AtomicMetrics::snapshot`] on its own schedule.

use fxhash::FxHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Identifies what a measurement is about: an event name and the payload type name
/// (`"signal"` for data-less events).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricKey<'a> {
    pub event: &'a str,
    pub payload: &'a str,
}

impl<'a> MetricKey<'a> {
    #[must_use]
    pub const fn new(event: &'a str, payload: &'a str) -> Self {
        Self { event, payload }
    }
}

/// Receiver of hub measurements. Implementations must be cheap and non-blocking: they are
/// called from publish paths and dispatch loops.
pub trait MetricsSink: Send + Sync + fmt::Debug + 'static {
    fn increment_published(&self, key: MetricKey<'_>);
    fn increment_processed(&self, key: MetricKey<'_>);
    fn increment_handler_error(&self, key: MetricKey<'_>);
    fn record_processing_time(&self, key: MetricKey<'_>, elapsed: Duration);
    fn set_subscriber_count(&self, count: usize);
    fn set_channel_count(&self, count: usize);

    /// An item was discarded by a drop policy.
    fn increment_dropped(&self, _key: MetricKey<'_>) {}

    /// Called by the hub on close, only for sinks the hub created itself.
    fn shutdown(&self) {}
}

/// Sink used when metrics are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_published(&self, _key: MetricKey<'_>) {}
    fn increment_processed(&self, _key: MetricKey<'_>) {}
    fn increment_handler_error(&self, _key: MetricKey<'_>) {}
    fn record_processing_time(&self, _key: MetricKey<'_>, _elapsed: Duration) {}
    fn set_subscriber_count(&self, _count: usize) {}
    fn set_channel_count(&self, _count: usize) {}
}

#[derive(Debug, Default)]
struct KeyCounters {
    published: AtomicU64,
    processed: AtomicU64,
    handler_errors: AtomicU64,
    dropped: AtomicU64,
    processing_micros: AtomicU64,
}

/// Built-in sink: one set of atomic counters per (event, payload) key plus global gauges.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    keys: RwLock<FxHashMap<(Box<str>, Box<str>), Arc<KeyCounters>>>,
    subscribers: AtomicUsize,
    channels: AtomicUsize,
}

impl AtomicMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, key: MetricKey<'_>) -> Arc<KeyCounters> {
        let id: (Box<str>, Box<str>) = (key.event.into(), key.payload.into());
        if let Some(found) = self.keys.read().get(&id) {
            return Arc::clone(found);
        }
        let mut keys = self.keys.write();
        Arc::clone(keys.entry(id).or_default())
    }

    /// Reads every counter. Individual counters are consistent; the snapshot as a whole
    /// is not an atomic cut across keys.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut events: Vec<EventMetrics> = self
            .keys
            .read()
            .iter()
            .map(|((event, payload), c)| {
                let processed = c.processed.load(Ordering::Relaxed);
                let micros = c.processing_micros.load(Ordering::Relaxed);
                EventMetrics {
                    event: event.to_string(),
                    payload: payload.to_string(),
                    published: c.published.load(Ordering::Relaxed),
                    processed,
                    handler_errors: c.handler_errors.load(Ordering::Relaxed),
                    dropped: c.dropped.load(Ordering::Relaxed),
                    avg_processing_ms: if processed == 0 {
                        0.0
                    } else {
                        micros as f64 / processed as f64 / 1_000.0
                    },
                }
            })
            .collect();
        events.sort_by(|a, b| (&a.event, &a.payload).cmp(&(&b.event, &b.payload)));

        MetricsSnapshot {
            subscribers: self.subscribers.load(Ordering::Relaxed),
            channels: self.channels.load(Ordering::Relaxed),
            events,
        }
    }
}

impl MetricsSink for AtomicMetrics {
    fn increment_published(&self, key: MetricKey<'_>) {
        self.counters(key).published.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_processed(&self, key: MetricKey<'_>) {
        self.counters(key).processed.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_handler_error(&self, key: MetricKey<'_>) {
        self.counters(key).handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_processing_time(&self, key: MetricKey<'_>, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.counters(key).processing_micros.fetch_add(micros, Ordering::Relaxed);
    }

    fn set_subscriber_count(&self, count: usize) {
        self.subscribers.store(count, Ordering::Relaxed);
    }

    fn set_channel_count(&self, count: usize) {
        self.channels.store(count, Ordering::Relaxed);
    }

    fn increment_dropped(&self, key: MetricKey<'_>) {
        self.counters(key).dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`AtomicMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub subscribers: usize,
    pub channels: usize,
    pub events: Vec<EventMetrics>,
}

impl MetricsSnapshot {
    /// Metrics for one (event, payload) key, if anything was recorded for it.
    #[must_use]
    pub fn event(&self, event: &str, payload: &str) -> Option<&EventMetrics> {
        self.events.iter().find(|m| m.event == event && m.payload == payload)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventMetrics {
    pub event: String,
    pub payload: String,
    pub published: u64,
    pub processed: u64,
    pub handler_errors: u64,
    pub dropped: u64,
    pub avg_processing_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_keyed_by_event_and_payload() {
        let metrics = AtomicMetrics::new();
        let tick = MetricKey::new("Tick", "i32");
        let tick_signal = MetricKey::new("Tick", "signal");

        metrics.increment_published(tick);
        metrics.increment_published(tick);
        metrics.increment_processed(tick);
        metrics.record_processing_time(tick, Duration::from_millis(4));
        metrics.increment_handler_error(tick_signal);
        metrics.increment_dropped(tick_signal);
        metrics.set_subscriber_count(3);
        metrics.set_channel_count(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.subscribers, 3);
        assert_eq!(snapshot.channels, 1);

        let data = snapshot.event("Tick", "i32").unwrap();
        assert_eq!(data.published, 2);
        assert_eq!(data.processed, 1);
        assert!((data.avg_processing_ms - 4.0).abs() < f64::EPSILON);

        let signal = snapshot.event("Tick", "signal").unwrap();
        assert_eq!(signal.handler_errors, 1);
        assert_eq!(signal.dropped, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = AtomicMetrics::new();
        metrics.increment_published(MetricKey::new("Alive", "signal"));
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["events"][0]["event"], "Alive");
        assert_eq!(json["events"][0]["published"], 1);
    }
}
