//! Enqueue strategies for full queues.
//!
//! Every publish first tries to reserve room without waiting. Only when a bounded queue is full
//! does the configured [`FullQueuePolicy`] come into play; the timeout and cancellation scope
//! is built on that slow path alone.

use crate::config::FullQueuePolicy;
use crate::error::EventHubError;
use crate::metrics::{MetricKey, MetricsSink};
use crate::queue::{EventQueue, Evict, Rejected, Slot};
use crate::state::Lifecycle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Result of a successful admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admitted {
    Enqueued,
    /// Discarded by [`FullQueuePolicy::DropNewest`].
    Dropped,
    /// The queue was completed because its last subscriber left.
    Retired,
}

/// The publish-side context of one enqueue.
#[derive(Clone, Copy)]
pub(crate) struct Admission<'a> {
    pub(crate) policy: FullQueuePolicy,
    pub(crate) timeout: Option<Duration>,
    pub(crate) caller: &'a CancellationToken,
    pub(crate) shutdown: &'a CancellationToken,
    pub(crate) lifecycle: &'a Lifecycle,
    pub(crate) metrics: &'a dyn MetricsSink,
}

impl Admission<'_> {
    /// Enqueues the item built by `make`, applying the full-queue policy when the fast path
    /// fails.
    ///
    /// `make` only runs once room is reserved, so dropped, timed-out and cancelled publishes
    /// never build an item.
    pub(crate) async fn enqueue<T: Evict>(
        &self,
        queue: &EventQueue<T>,
        make: impl FnOnce() -> T,
        key: MetricKey<'_>,
    ) -> Result<Admitted, EventHubError> {
        let slot = match queue.try_reserve() {
            Ok(slot) => slot,
            Err(Rejected::Closed) => return self.closed(key),
            Err(Rejected::Full) => match self.policy {
                FullQueuePolicy::DropNewest => return Ok(self.dropped(key)),
                FullQueuePolicy::DropOldest => match self.evict_oldest(queue, key) {
                    Some(slot) => slot,
                    None => return self.closed(key),
                },
                FullQueuePolicy::Block => match self.wait_for_capacity(queue, key).await? {
                    Some(slot) => slot,
                    None => return self.closed(key),
                },
            },
        };

        slot.send(make());
        Ok(self.published(key))
    }

    /// Non-blocking variant: never waits, reports whether the item was accepted.
    pub(crate) fn try_enqueue<T: Evict>(
        &self,
        queue: &EventQueue<T>,
        make: impl FnOnce() -> T,
        key: MetricKey<'_>,
    ) -> bool {
        let slot = match queue.try_reserve() {
            Ok(slot) => slot,
            Err(Rejected::Closed) => return false,
            Err(Rejected::Full) => match self.policy {
                FullQueuePolicy::DropOldest => match self.evict_oldest(queue, key) {
                    Some(slot) => slot,
                    None => return false,
                },
                FullQueuePolicy::DropNewest => {
                    self.dropped(key);
                    return false;
                },
                FullQueuePolicy::Block => return false,
            },
        };

        slot.send(make());
        self.published(key);
        true
    }

    fn evict_oldest<'q, T: Evict>(
        &self,
        queue: &'q EventQueue<T>,
        key: MetricKey<'_>,
    ) -> Option<Slot<'q, T>> {
        let (slot, evicted) = queue.reserve_evicting().ok()?;
        for item in evicted {
            if item.evict() {
                self.metrics.increment_dropped(key);
                debug!(event = key.event, payload = key.payload, "Queue full, oldest item evicted");
            }
        }
        Some(slot)
    }

    /// Waits for room. `Ok(None)` means the queue was closed meanwhile.
    async fn wait_for_capacity<'q, T>(
        &self,
        queue: &'q EventQueue<T>,
        key: MetricKey<'_>,
    ) -> Result<Option<Slot<'q, T>>, EventHubError> {
        trace!(event = key.event, payload = key.payload, "Queue full, waiting for capacity");

        let reserve = queue.reserve();
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, reserve).await.ok(),
                None => Some(reserve.await),
            }
        };

        tokio::select! {
            biased;
            () = self.caller.cancelled() => {
                Err(EventHubError::cancelled("publish cancelled while waiting for queue capacity"))
            },
            () = self.shutdown.cancelled() => Err(EventHubError::disposed()),
            reserved = bounded => match reserved {
                Some(Ok(slot)) => Ok(Some(slot)),
                Some(Err(_)) => Ok(None),
                None => {
                    warn!(
                        event = key.event,
                        payload = key.payload,
                        timeout = ?self.timeout,
                        "Backpressure timeout"
                    );
                    Err(EventHubError::BackpressureTimeout {
                        event: key.event.to_owned().into(),
                        payload: key.payload.to_owned().into(),
                        context: None,
                    })
                },
            },
        }
    }

    fn published(&self, key: MetricKey<'_>) -> Admitted {
        self.metrics.increment_published(key);
        Admitted::Enqueued
    }

    fn dropped(&self, key: MetricKey<'_>) -> Admitted {
        self.metrics.increment_dropped(key);
        debug!(event = key.event, payload = key.payload, "Queue full, newest item dropped");
        Admitted::Dropped
    }

    /// A closed queue means either hub shutdown or a channel retired by its last unsubscribe.
    fn closed(&self, key: MetricKey<'_>) -> Result<Admitted, EventHubError> {
        self.lifecycle.ensure_active()?;
        trace!(event = key.event, payload = key.payload, "Channel retired during publish");
        Ok(Admitted::Retired)
    }
}
