//! Data channels: one queue, loop and handler set per (event name, declared payload type).

use crate::backpressure::{Admission, Admitted};
use crate::dispatch::{Dispatcher, Envelope, Receipt, WildcardClaim};
use crate::error::EventHubError;
use crate::event::EventName;
use crate::handler::{DataHandler, Invocation};
use crate::metrics::MetricKey;
use crate::pending::{PendingGauge, PendingTracker};
use crate::queue::EventQueue;
use crate::subscription::{HandlerList, SubscriptionId};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct DataChannel<T: ?Sized + Send + Sync + 'static> {
    name: EventName,
    handlers: HandlerList<DataHandler<T>>,
    queue: EventQueue<Envelope<Arc<T>>>,
    pending: PendingTracker,
}

impl<T: ?Sized + Send + Sync + 'static> DataChannel<T> {
    pub(crate) fn new(name: EventName, capacity: Option<usize>, total: PendingGauge) -> Self {
        Self {
            name,
            handlers: HandlerList::new(),
            queue: EventQueue::new(capacity),
            pending: PendingTracker::new(total),
        }
    }

    pub(crate) fn add_handler(&self, id: SubscriptionId, handler: DataHandler<T>) -> usize {
        self.handlers.push(id, handler)
    }

    fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }

    /// Consumes the queue until it is completed and empty, or the hub shuts down.
    pub(crate) async fn run(self: Arc<Self>, dispatcher: Dispatcher) {
        let payload = Self::type_name();
        debug!(event = %self.name, payload, "Data channel loop started");

        loop {
            let next = tokio::select! {
                biased;
                () = dispatcher.shutdown().cancelled() => None,
                item = self.queue.pop() => item,
            };
            let Some(Envelope { value, receipt }) = next else { break };

            let token = dispatcher.handler_token();
            let calls: Vec<Invocation> = self
                .handlers
                .snapshot()
                .iter()
                .map(|entry| {
                    let handler = Arc::clone(&entry.handler);
                    let value = Arc::clone(&value);
                    let token = token.clone();
                    Box::new(move || handler(value, token)) as Invocation
                })
                .collect();

            dispatcher.dispatch(self.name.clone(), payload, receipt, token, calls).await;
        }

        debug!(event = %self.name, payload, "Data channel loop stopped");
    }
}

impl<T: ?Sized + Send + Sync + 'static> fmt::Debug for DataChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("name", &self.name)
            .field("payload", &Self::type_name())
            .field("handlers", &self.handlers.len())
            .field("queue", &self.queue)
            .finish()
    }
}

/// Type-erased view of a [`DataChannel`], used by the registry and the publish path.
pub(crate) trait ErasedChannel: Send + Sync + fmt::Debug {
    /// Enqueues a payload produced by [`Event::into_exact`](crate::Event::into_exact) or a
    /// registered view, i.e. a `Box<Arc<T>>` for this channel's `T`.
    fn admit<'a>(
        &'a self,
        payload: Box<dyn Any + Send>,
        notify_wildcards: &'a WildcardClaim,
        admission: Admission<'a>,
    ) -> BoxFuture<'a, Result<Admitted, EventHubError>>;

    fn pending(&self) -> &PendingGauge;

    fn remove_handler(&self, id: SubscriptionId) -> Option<usize>;

    /// Completes the queue; already queued items are still delivered.
    fn retire(&self);

    /// Completes the queue and discards undelivered items.
    fn shutdown(&self);

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: ?Sized + Send + Sync + 'static> ErasedChannel for DataChannel<T> {
    fn admit<'a>(
        &'a self,
        payload: Box<dyn Any + Send>,
        notify_wildcards: &'a WildcardClaim,
        admission: Admission<'a>,
    ) -> BoxFuture<'a, Result<Admitted, EventHubError>> {
        async move {
            let value = payload.downcast::<Arc<T>>().map_err(|_| EventHubError::Internal {
                message: format!("payload does not match channel type {}", Self::type_name())
                    .into(),
                context: Some(self.name.to_string().into()),
            })?;
            let make = || {
                let receipt = Receipt {
                    caller: admission.caller.clone(),
                    notify_wildcards: notify_wildcards.claim(),
                    guard: self.pending.acquire(),
                };
                Envelope::new(*value, receipt)
            };
            let key = MetricKey::new(&self.name, Self::type_name());
            admission.enqueue(&self.queue, make, key).await
        }
        .boxed()
    }

    fn pending(&self) -> &PendingGauge {
        self.pending.local()
    }

    fn remove_handler(&self, id: SubscriptionId) -> Option<usize> {
        self.handlers.remove(id)
    }

    fn retire(&self) {
        self.queue.close();
        debug!(event = %self.name, payload = Self::type_name(), "Data channel retired");
    }

    fn shutdown(&self) {
        drop(self.queue.close_and_take());
        self.handlers.clear();
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
