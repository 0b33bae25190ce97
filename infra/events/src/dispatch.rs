//! Per-item handler execution shared by the signal loop and every data channel loop.

use crate::event::EventName;
use crate::handler::{Invocation, WildcardHandler, invoke};
use crate::metrics::{MetricKey, MetricsSink};
use crate::pending::PendingGuard;
use crate::queue::Evict;
use crate::subscription::{HandlerEntry, HandlerList};
use futures::future::join_all;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::trace;

/// A queued item together with what it needs once dequeued.
#[derive(Debug)]
pub(crate) struct Envelope<V> {
    pub(crate) value: V,
    pub(crate) receipt: Receipt,
}

/// Per-item bookkeeping carried through the queue.
#[derive(Debug)]
pub(crate) struct Receipt {
    /// The publisher's token; cancelling it cancels the item's handlers.
    pub(crate) caller: CancellationToken,
    /// Set on exactly one enqueued item per publish: the one that notifies wildcard
    /// subscribers.
    pub(crate) notify_wildcards: bool,
    /// Keeps the item counted as pending until every handler finished.
    pub(crate) guard: PendingGuard,
}

impl<V> Envelope<V> {
    pub(crate) const fn new(value: V, receipt: Receipt) -> Self {
        Self { value, receipt }
    }
}

impl<V> Evict for Envelope<V> {
    fn evict(self) -> bool {
        true
    }
}

/// Hands the wildcard notification of one publish to the first item actually enqueued.
#[derive(Debug, Default)]
pub(crate) struct WildcardClaim(AtomicBool);

impl WildcardClaim {
    /// A claim that is already spent: nothing built against it notifies wildcards.
    pub(crate) const fn taken() -> Self {
        Self(AtomicBool::new(true))
    }

    /// Returns `true` exactly once.
    pub(crate) fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.0.load(Ordering::Acquire)
    }
}

/// Everything a dispatch loop needs from the hub, without holding the hub itself.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    shutdown: CancellationToken,
    tracker: TaskTracker,
    strict: bool,
    metrics: Arc<dyn MetricsSink>,
    wildcards: Arc<HandlerList<WildcardHandler>>,
}

impl Dispatcher {
    pub(crate) fn new(
        shutdown: CancellationToken,
        tracker: TaskTracker,
        strict: bool,
        metrics: Arc<dyn MetricsSink>,
        wildcards: Arc<HandlerList<WildcardHandler>>,
    ) -> Self {
        Self { shutdown, tracker, strict, metrics, wildcards }
    }

    pub(crate) const fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// A fresh token for one item's handlers, cancelled on hub shutdown.
    pub(crate) fn handler_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Delivers one dequeued item.
    ///
    /// Handlers for the item run concurrently; wildcard subscribers are notified after them.
    /// In strict mode this resolves once everything finished. Otherwise the work is detached
    /// onto the hub's task tracker and the pending guard travels with it.
    pub(crate) async fn dispatch(
        &self,
        event: EventName,
        payload: &'static str,
        receipt: Receipt,
        token: CancellationToken,
        calls: Vec<Invocation>,
    ) {
        let wildcards = receipt.notify_wildcards.then(|| self.wildcards.snapshot());
        let metrics = Arc::clone(&self.metrics);
        let work = deliver(event, payload, receipt, token, calls, wildcards, metrics);

        if self.strict {
            work.await;
        } else {
            self.tracker.spawn(work);
        }
    }
}

async fn deliver(
    event: EventName,
    payload: &'static str,
    receipt: Receipt,
    token: CancellationToken,
    calls: Vec<Invocation>,
    wildcards: Option<Arc<Vec<HandlerEntry<WildcardHandler>>>>,
    metrics: Arc<dyn MetricsSink>,
) {
    let Receipt { caller, guard, .. } = receipt;
    let key = MetricKey::new(&event, payload);
    let started = Instant::now();
    let handlers = calls.len();

    let typed = join_all(calls.into_iter().map(|call| invoke(call, key, &token, &*metrics)));
    caller_scope(&token, &caller, typed).await;

    if let Some(wildcards) = wildcards.filter(|w| !w.is_empty()) {
        let notified = join_all(wildcards.iter().map(|entry| {
            let handler = Arc::clone(&entry.handler);
            let name = event.clone();
            let handler_token = token.clone();
            let call: Invocation = Box::new(move || handler(name, handler_token));
            invoke(call, key, &token, &*metrics)
        }));
        caller_scope(&token, &caller, notified).await;
    }

    let elapsed = started.elapsed();
    metrics.increment_processed(key);
    metrics.record_processing_time(key, elapsed);
    trace!(
        event = %event,
        payload,
        handlers,
        elapsed_ms = elapsed.as_secs_f64() * 1_000.0,
        "Event dispatched"
    );
    drop(guard);
}

/// Drives `work` to completion, cancelling `token` if the publisher's token fires first.
async fn caller_scope<F: Future>(
    token: &CancellationToken,
    caller: &CancellationToken,
    work: F,
) -> F::Output {
    let mut work = pin!(work);
    tokio::select! {
        biased;
        output = &mut work => return output,
        () = caller.cancelled() => token.cancel(),
    }
    work.await
}
