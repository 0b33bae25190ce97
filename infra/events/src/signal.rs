//! The signal channel: one FIFO of event names consumed by a single loop.
//!
//! Besides named signals the queue also carries wildcard-only notifications (data publishes
//! nobody subscribed to by type) and drain barriers.

use crate::backpressure::{Admission, Admitted};
use crate::dispatch::{Dispatcher, Envelope, Receipt};
use crate::error::EventHubError;
use crate::event::{EventName, SIGNAL_PAYLOAD};
use crate::handler::{Invocation, SignalHandler};
use crate::metrics::MetricKey;
use crate::pending::{PendingGauge, PendingTracker};
use crate::queue::{EventQueue, Evict};
use crate::subscription::{HandlerList, SubscriptionId};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct SignalEvent {
    name: EventName,
    payload: &'static str,
    /// `false` for wildcard-only notifications: named signal handlers are skipped.
    named: bool,
}

#[derive(Debug)]
pub(crate) enum SignalItem {
    Event(Envelope<SignalEvent>),
    Barrier(oneshot::Sender<()>),
}

impl Evict for SignalItem {
    fn evict(self) -> bool {
        match self {
            Self::Event(_) => true,
            // Everything queued ahead of an evicted barrier has already left the queue.
            Self::Barrier(ack) => {
                let _ = ack.send(());
                false
            },
        }
    }
}

#[derive(Debug)]
pub(crate) struct SignalChannel {
    handlers: RwLock<FxHashMap<EventName, Arc<HandlerList<SignalHandler>>>>,
    queue: EventQueue<SignalItem>,
    pending: PendingTracker,
}

impl SignalChannel {
    pub(crate) fn new(capacity: Option<usize>, total: PendingGauge) -> Self {
        Self {
            handlers: RwLock::new(FxHashMap::default()),
            queue: EventQueue::new(capacity),
            pending: PendingTracker::new(total),
        }
    }

    pub(crate) fn subscribe(&self, name: EventName, id: SubscriptionId, handler: SignalHandler) {
        let mut handlers = self.handlers.write();
        handlers.entry(name).or_insert_with(|| Arc::new(HandlerList::new())).push(id, handler);
    }

    pub(crate) fn unsubscribe(&self, name: &EventName, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(remaining) = handlers.get(name).and_then(|list| list.remove(id)) else {
            return false;
        };
        if remaining == 0 {
            handlers.remove(name);
        }
        true
    }

    /// Queues a signal (`named`) or a wildcard-only notification.
    pub(crate) async fn publish(
        &self,
        name: EventName,
        payload: &'static str,
        named: bool,
        admission: Admission<'_>,
    ) -> Result<Admitted, EventHubError> {
        let key = MetricKey::new(&name, payload);
        let make = || self.item(name.clone(), payload, named, admission.caller);
        admission.enqueue(&self.queue, make, key).await
    }

    pub(crate) fn try_publish(&self, name: EventName, admission: Admission<'_>) -> bool {
        let make = || self.item(name.clone(), SIGNAL_PAYLOAD, true, admission.caller);
        admission.try_enqueue(&self.queue, make, MetricKey::new(&name, SIGNAL_PAYLOAD))
    }

    fn item(
        &self,
        name: EventName,
        payload: &'static str,
        named: bool,
        caller: &CancellationToken,
    ) -> SignalItem {
        let receipt = Receipt {
            caller: caller.clone(),
            notify_wildcards: true,
            guard: self.pending.acquire(),
        };
        SignalItem::Event(Envelope::new(SignalEvent { name, payload, named }, receipt))
    }

    /// Queues a barrier behind everything already queued and waits until the loop reaches it.
    ///
    /// Barriers ignore the full-queue policy: they wait for room and are never observed by
    /// handlers. A barrier evicted by a drop-oldest publish resolves at once.
    pub(crate) async fn barrier(&self) -> Result<(), EventHubError> {
        let (tx, rx) = oneshot::channel();
        let slot = self.queue.reserve().await.map_err(|_| EventHubError::disposed())?;
        slot.send(SignalItem::Barrier(tx));
        rx.await.map_err(|_| EventHubError::disposed())
    }

    pub(crate) const fn pending(&self) -> &PendingGauge {
        self.pending.local()
    }

    /// Completes the queue, discarding undelivered items, and forgets every handler.
    pub(crate) fn shutdown(&self) {
        drop(self.queue.close_and_take());
        self.handlers.write().clear();
    }

    fn snapshot(&self, name: &EventName) -> Option<Arc<HandlerList<SignalHandler>>> {
        self.handlers.read().get(name).cloned()
    }

    pub(crate) async fn run(self: Arc<Self>, dispatcher: Dispatcher) {
        debug!("Signal loop started");
        loop {
            let next = tokio::select! {
                biased;
                () = dispatcher.shutdown().cancelled() => None,
                item = self.queue.pop() => item,
            };
            let Some(item) = next else { break };

            let envelope = match item {
                SignalItem::Barrier(ack) => {
                    let _ = ack.send(());
                    continue;
                },
                SignalItem::Event(envelope) => envelope,
            };

            let SignalEvent { name, payload, named } = envelope.value;
            let token = dispatcher.handler_token();
            let mut calls: Vec<Invocation> = Vec::new();
            if let Some(list) = named.then(|| self.snapshot(&name)).flatten() {
                calls.extend(list.snapshot().iter().map(|entry| {
                    let handler = Arc::clone(&entry.handler);
                    let token = token.clone();
                    Box::new(move || handler(token)) as Invocation
                }));
            }

            dispatcher.dispatch(name, payload, envelope.receipt, token, calls).await;
        }
        debug!("Signal loop stopped");
    }
}
