use std::sync::Arc;
use tokio::sync::watch;

/// Count of published-but-not-yet-handled items, observable by waiters.
#[derive(Debug, Clone)]
pub(crate) struct PendingGauge {
    count: Arc<watch::Sender<usize>>,
}

impl PendingGauge {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { count: Arc::new(tx) }
    }

    pub(crate) fn get(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once the count is zero (immediately if it already is).
    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot observe a closed channel.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    fn increment(&self) {
        self.count.send_modify(|count| *count += 1);
    }

    fn decrement(&self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// The gauges an item counts against: its own channel and the hub-wide total.
#[derive(Debug, Clone)]
pub(crate) struct PendingTracker {
    local: PendingGauge,
    total: PendingGauge,
}

impl PendingTracker {
    pub(crate) fn new(total: PendingGauge) -> Self {
        Self { local: PendingGauge::new(), total }
    }

    pub(crate) const fn local(&self) -> &PendingGauge {
        &self.local
    }

    /// Counts one item as pending until the returned guard is dropped.
    pub(crate) fn acquire(&self) -> PendingGuard {
        self.local.increment();
        self.total.increment();
        PendingGuard { tracker: self.clone() }
    }
}

/// Decrements both gauges on drop: after handling, eviction, rejection or shutdown alike.
#[derive(Debug)]
pub(crate) struct PendingGuard {
    tracker: PendingTracker,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.tracker.local.decrement();
        self.tracker.total.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_tracks_local_and_total() {
        let total = PendingGauge::new();
        let a = PendingTracker::new(total.clone());
        let b = PendingTracker::new(total.clone());

        let ga = a.acquire();
        let gb = b.acquire();
        assert_eq!(a.local().get(), 1);
        assert_eq!(b.local().get(), 1);
        assert_eq!(total.get(), 2);

        drop(ga);
        assert_eq!(a.local().get(), 0);
        assert_eq!(total.get(), 1);
        drop(gb);
        assert_eq!(total.get(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_after_release() {
        let tracker = PendingTracker::new(PendingGauge::new());
        let guard = tracker.acquire();

        let waiter = {
            let gauge = tracker.local().clone();
            tokio::spawn(async move { gauge.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }
}
