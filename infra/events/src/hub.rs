use crate::backpressure::{Admission, Admitted};
use crate::channel::DataChannel;
use crate::config::{FullQueuePolicy, HubOptions};
use crate::dispatch::{Dispatcher, WildcardClaim};
use crate::error::{EventHubError, EventHubErrorExt};
use crate::event::{Event, EventName, SIGNAL_PAYLOAD};
use crate::handler::{
    HandlerResult, WildcardHandler, data_handler, signal_handler, wildcard_handler,
};
use crate::metrics::{AtomicMetrics, MetricsSink, MetricsSnapshot, NoopMetrics};
use crate::pending::PendingGauge;
use crate::registry::ChannelRegistry;
use crate::signal::SignalChannel;
use crate::state::{HubState, Lifecycle};
use crate::subscription::{
    HandlerList, Subscription, SubscriptionId, SubscriptionKind, SubscriptionOwner,
};
use futures::future::join_all;
use std::any::TypeId;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

/// Payload name reported for wildcard subscriptions.
const WILDCARD_PAYLOAD: &str = "*";

/// An in-process asynchronous publish/subscribe hub.
///
/// Signals (named events without payload) share one FIFO queue and consumer loop. Data
/// events get one queue and loop per `(event name, declared payload type)`, created on the
/// first subscription and retired with the last one. Publishing returns once the item is
/// enqueued, not once handlers ran; use [`EventHub::drain`] to wait for quiescence.
///
/// The handle is cheap to clone. Background loops are owned by the hub and stopped by
/// [`EventHub::close`] (or when the last handle is dropped).
///
/// # Examples
/// ```rust
/// use courier_events::{CancellationToken, EventHub};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), courier_events::EventHubError> {
/// let hub = EventHub::builder().build()?;
/// let ticks = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&ticks);
/// let _sub = hub.subscribe::<i32, _, _>("Tick", move |value, _| {
///     let counter = Arc::clone(&counter);
///     async move {
///         counter.fetch_add(*value as usize, Ordering::SeqCst);
///         Ok(())
///     }
/// })?;
///
/// let ctx = CancellationToken::new();
/// hub.publish("Tick", 2_i32, &ctx).await?;
/// hub.drain(&ctx).await?;
/// assert_eq!(ticks.load(Ordering::SeqCst), 2);
/// hub.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    options: HubOptions,
    lifecycle: Lifecycle,
    next_id: AtomicU64,
    subscribers: AtomicUsize,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    runtime: Handle,
    dispatcher: Dispatcher,
    wildcards: Arc<HandlerList<WildcardHandler>>,
    signals: Arc<SignalChannel>,
    channels: ChannelRegistry,
    in_flight: PendingGauge,
    metrics: Arc<dyn MetricsSink>,
    builtin_metrics: Option<Arc<AtomicMetrics>>,
    owns_metrics: bool,
}

/// Builder for [`EventHub`].
#[derive(Debug, Default)]
pub struct HubBuilder {
    options: HubOptions,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl HubBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "Replaces every option set so far"]
    pub fn options(mut self, options: HubOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use = "Bounds every queue owned by the hub"]
    pub fn max_queue_capacity(mut self, capacity: usize) -> Self {
        self.options.max_queue_capacity = Some(capacity);
        self
    }

    #[must_use = "Selects what happens when a bounded queue is full"]
    pub fn full_queue_policy(mut self, policy: FullQueuePolicy) -> Self {
        self.options.full_queue_policy = policy;
        self
    }

    #[must_use = "Limits how long a publish may wait for queue capacity"]
    pub fn backpressure_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options = self.options.with_backpressure_timeout(timeout);
        self
    }

    #[must_use = "Switches between strict completion and fire-and-collect dispatch"]
    pub fn strict_completion(mut self, strict: bool) -> Self {
        self.options.strict_completion = strict;
        self
    }

    #[must_use = "Toggles the built-in metrics sink"]
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.options.metrics_enabled = enabled;
        self
    }

    #[must_use = "Sets the safety timeout used by drain"]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_drain_timeout(timeout);
        self
    }

    #[must_use = "Sets how long close waits for background loops"]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_shutdown_timeout(timeout);
        self
    }

    /// Uses an external sink instead of the built-in one. The hub never shuts it down.
    #[must_use = "Routes hub measurements to the given sink"]
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Builds the hub and starts the signal loop on the current Tokio runtime.
    ///
    /// # Errors
    /// Returns [`EventHubError::InvalidCapacity`] for a zero queue capacity and
    /// [`EventHubError::Internal`] when called outside a Tokio runtime.
    pub fn build(self) -> Result<EventHub, EventHubError> {
        self.options.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| EventHubError::from(e.to_string()))
            .context("EventHub must be built inside a Tokio runtime")?;

        let (metrics, builtin_metrics, owns_metrics) = match self.metrics {
            Some(sink) => (sink, None, false),
            None if self.options.metrics_enabled => {
                let builtin = Arc::new(AtomicMetrics::new());
                (builtin.clone() as Arc<dyn MetricsSink>, Some(builtin), true)
            },
            None => (Arc::new(NoopMetrics) as Arc<dyn MetricsSink>, None, true),
        };

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let wildcards = Arc::new(HandlerList::new());
        let in_flight = PendingGauge::new();
        let dispatcher = Dispatcher::new(
            shutdown.clone(),
            tracker.clone(),
            self.options.strict_completion,
            Arc::clone(&metrics),
            Arc::clone(&wildcards),
        );
        let signals =
            Arc::new(SignalChannel::new(self.options.max_queue_capacity, in_flight.clone()));
        tracker.spawn_on(Arc::clone(&signals).run(dispatcher.clone()), &runtime);

        info!(
            capacity = ?self.options.max_queue_capacity,
            policy = ?self.options.full_queue_policy,
            strict = self.options.strict_completion,
            "Event hub started"
        );

        Ok(EventHub {
            inner: Arc::new(HubInner {
                options: self.options,
                lifecycle: Lifecycle::new(),
                next_id: AtomicU64::new(1),
                subscribers: AtomicUsize::new(0),
                shutdown,
                tracker,
                runtime,
                dispatcher,
                wildcards,
                signals,
                channels: ChannelRegistry::default(),
                in_flight,
                metrics,
                builtin_metrics,
                owns_metrics,
            }),
        })
    }
}

impl EventHub {
    #[must_use]
    pub fn builder() -> HubBuilder {
        HubBuilder::new()
    }

    /// Shorthand for `EventHub::builder().options(options).build()`.
    ///
    /// # Errors
    /// See [`HubBuilder::build`].
    pub fn new(options: HubOptions) -> Result<Self, EventHubError> {
        HubBuilder::new().options(options).build()
    }

    /// Registers a handler for the named signal.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started, [`EventHubError::InvalidEventName`]
    /// for a blank name.
    pub fn subscribe_signal<F, Fut>(
        &self,
        name: impl Into<EventName>,
        handler: F,
    ) -> Result<Subscription, EventHubError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.lifecycle.ensure_active()?;
        let name = EventName::new(name)?;
        let id = self.inner.next_id();

        self.inner.signals.subscribe(name.clone(), id, signal_handler(handler));
        self.inner.subscribed();
        debug!(event = %name, id, "Signal handler subscribed");

        Ok(self.subscription(id, Some(name), SubscriptionKind::Signal, SIGNAL_PAYLOAD))
    }

    /// Registers a handler for payloads delivered as `T` under `name`.
    ///
    /// `T` may be unsized (`dyn Trait`); such subscribers receive published values for
    /// which a [view](Self::register_view) into `T` was registered.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started, [`EventHubError::InvalidEventName`]
    /// for a blank name.
    pub fn subscribe<T, F, Fut>(
        &self,
        name: impl Into<EventName>,
        handler: F,
    ) -> Result<Subscription, EventHubError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.lifecycle.ensure_active()?;
        let name = EventName::new(name)?;
        let id = self.inner.next_id();
        let inner = &self.inner;

        let create = || {
            DataChannel::new(name.clone(), inner.options.max_queue_capacity, inner.in_flight.clone())
        };
        let created =
            inner.channels.subscribe::<T>(&name, id, data_handler(handler), &inner.lifecycle, create)?;
        if let Some(channel) = created {
            inner.tracker.spawn_on(channel.run(inner.dispatcher.clone()), &inner.runtime);
            inner.metrics.set_channel_count(inner.channels.len());
            debug!(event = %name, payload = std::any::type_name::<T>(), "Data channel created");
        }
        inner.subscribed();

        Ok(self.subscription(
            id,
            Some(name),
            SubscriptionKind::Data(TypeId::of::<T>()),
            std::any::type_name::<T>(),
        ))
    }

    /// [`subscribe`](Self::subscribe) under the default name for `T`, its type name.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started.
    pub fn subscribe_type<T, F, Fut>(&self, handler: F) -> Result<Subscription, EventHubError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.lifecycle.ensure_active()?;
        self.subscribe::<T, F, Fut>(EventName::of::<T>(), handler)
    }

    /// Registers a handler notified with the event name of every signal and data publish.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started.
    pub fn subscribe_all<F, Fut>(&self, handler: F) -> Result<Subscription, EventHubError>
    where
        F: Fn(EventName, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.lifecycle.ensure_active()?;
        let id = self.inner.next_id();

        self.inner.wildcards.push(id, wildcard_handler(handler));
        self.inner.subscribed();
        debug!(id, "Wildcard handler subscribed");

        Ok(self.subscription(id, None, SubscriptionKind::Wildcard, WILDCARD_PAYLOAD))
    }

    /// Declares that a published `S` may be delivered to subscribers of `T`.
    ///
    /// Typically `T` is a trait object implemented by `S`:
    /// `hub.register_view::<Batch, dyn Sequence, _>(|b| b as Arc<dyn Sequence>)`.
    /// Registering the same pair again replaces the projection.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started.
    pub fn register_view<S, T, F>(&self, view: F) -> Result<(), EventHubError>
    where
        S: Event,
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<S>) -> Arc<T> + Send + Sync + 'static,
    {
        self.inner.lifecycle.ensure_active()?;
        self.inner.channels.views().register::<S, T, F>(view);
        debug!(
            source = std::any::type_name::<S>(),
            target = std::any::type_name::<T>(),
            "Type view registered"
        );
        Ok(())
    }

    /// Enqueues a signal. Returns once the signal is queued, not once handlers ran.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`], [`EventHubError::InvalidEventName`],
    /// [`EventHubError::BackpressureTimeout`] when a bounded queue stays full, and
    /// [`EventHubError::Cancelled`] when `ctx` fires while waiting for capacity.
    pub async fn publish_signal(
        &self,
        name: impl Into<EventName>,
        ctx: &CancellationToken,
    ) -> Result<(), EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        let name = EventName::new(name)?;
        let admission = self.inner.admission(ctx);
        self.inner.signals.publish(name, SIGNAL_PAYLOAD, true, admission).await.map(drop)
    }

    /// Best-effort, non-blocking signal publish. Returns `false` if the hub is not active,
    /// the name is blank or the item could not be queued immediately.
    pub fn try_publish_signal(&self, name: impl Into<EventName>) -> bool {
        if !self.inner.lifecycle.is_active() {
            return false;
        }
        let Ok(name) = EventName::new(name) else {
            return false;
        };
        let ctx = CancellationToken::new();
        self.inner.signals.try_publish(name, self.inner.admission(&ctx))
    }

    /// Publishes `data` under `name`.
    ///
    /// The value reaches every data channel under `name` declared for its exact type or for
    /// a type it has a registered view into. Returns once every enqueue completed.
    ///
    /// # Errors
    /// As [`publish_signal`](Self::publish_signal).
    pub async fn publish<T: Event>(
        &self,
        name: impl Into<EventName>,
        data: T,
        ctx: &CancellationToken,
    ) -> Result<(), EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        self.publish_arc(name, Arc::new(data), ctx).await
    }

    /// [`publish`](Self::publish) for a value that is already shared.
    ///
    /// # Errors
    /// As [`publish_signal`](Self::publish_signal).
    pub async fn publish_arc<T: Event>(
        &self,
        name: impl Into<EventName>,
        data: Arc<T>,
        ctx: &CancellationToken,
    ) -> Result<(), EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        let name = EventName::new(name)?;
        self.inner.publish_value(name, data, ctx).await
    }

    /// [`publish`](Self::publish) under the default name for `T`, its type name.
    ///
    /// # Errors
    /// As [`publish_signal`](Self::publish_signal).
    pub async fn publish_type<T: Event>(
        &self,
        data: T,
        ctx: &CancellationToken,
    ) -> Result<(), EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        self.inner.publish_value(EventName::of::<T>(), Arc::new(data), ctx).await
    }

    /// Publishes a value whose concrete type is only known at runtime, under its type name.
    ///
    /// This is the entry point for transport adapters bridging external messages.
    ///
    /// # Errors
    /// As [`publish_signal`](Self::publish_signal).
    pub async fn publish_dyn(
        &self,
        data: Arc<dyn Event>,
        ctx: &CancellationToken,
    ) -> Result<(), EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        let name = EventName::from(Event::event_name(&*data));
        self.inner.publish_value(name, data, ctx).await
    }

    /// Waits until every queue is empty and every handler finished.
    ///
    /// Data channels are awaited first, then a barrier is pushed through the signal queue.
    /// Repeats while handlers keep publishing.
    ///
    /// # Errors
    /// [`EventHubError::DrainTimeout`] once the configured drain timeout elapses,
    /// [`EventHubError::Cancelled`] when `ctx` fires, [`EventHubError::Disposed`] if the hub
    /// shuts down meanwhile.
    pub async fn drain(&self, ctx: &CancellationToken) -> Result<(), EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        let timeout = self.inner.options.drain_timeout();
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            () = ctx.cancelled() => Err(EventHubError::cancelled("drain cancelled")),
            () = self.inner.shutdown.cancelled() => Err(EventHubError::disposed()),
            idle = tokio::time::timeout(timeout, self.inner.quiesce()) => match idle {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        timeout_ms = self.inner.options.drain_timeout_ms,
                        pending = self.inner.in_flight.get(),
                        "Drain timed out"
                    );
                    Err(EventHubError::DrainTimeout {
                        message: format!(
                            "{} item(s) still pending after {timeout:?}",
                            self.inner.in_flight.get()
                        )
                        .into(),
                        context: None,
                    })
                },
            },
        };

        if result.is_ok() {
            debug!(elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0, "Event hub drained");
        }
        result
    }

    /// Shuts the hub down: stops accepting operations, completes every queue, cancels
    /// in-flight handlers and waits (bounded by the shutdown timeout) for background loops.
    ///
    /// Queued items that were not dispatched yet are discarded; call
    /// [`drain`](Self::drain) first for a graceful stop.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] if the hub was already closed.
    pub async fn close(&self) -> Result<(), EventHubError> {
        let inner = &self.inner;
        inner.lifecycle.begin_shutdown()?;
        info!("Event hub shutting down");

        inner.signals.shutdown();
        inner.channels.shutdown();
        inner.shutdown.cancel();
        inner.tracker.close();

        let timeout = inner.options.shutdown_timeout();
        if tokio::time::timeout(timeout, inner.tracker.wait()).await.is_err() {
            warn!(
                timeout_ms = inner.options.shutdown_timeout_ms,
                tasks = inner.tracker.len(),
                "Background tasks still running after shutdown timeout"
            );
        }

        inner.wildcards.clear();
        inner.subscribers.store(0, Ordering::Release);
        inner.metrics.set_subscriber_count(0);
        inner.metrics.set_channel_count(0);
        if inner.owns_metrics {
            inner.metrics.shutdown();
        }

        inner.lifecycle.finish();
        info!("Event hub disposed");
        Ok(())
    }

    /// Items queued or being handled across data channels registered under `name`.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started.
    pub fn pending_count(&self, name: &str) -> Result<usize, EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        let name = EventName::from(name);
        Ok(self.inner.channels.channels_for(&name).iter().map(|c| c.pending().get()).sum())
    }

    /// Items queued or being handled by the data channel for `(name, T)`.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started.
    pub fn pending_count_for<T: ?Sized + 'static>(
        &self,
        name: &str,
    ) -> Result<usize, EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        let name = EventName::from(name);
        Ok(self
            .inner
            .channels
            .channel(&name, TypeId::of::<T>())
            .map_or(0, |channel| channel.pending().get()))
    }

    /// Items queued or being handled anywhere in the hub, signals included.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started.
    pub fn pending_total(&self) -> Result<usize, EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        Ok(self.inner.in_flight.get())
    }

    /// Active registrations of every kind.
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started.
    pub fn subscriber_count(&self) -> Result<usize, EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        Ok(self.inner.subscribers.load(Ordering::Acquire))
    }

    /// Live data channels (the signal channel is not counted).
    ///
    /// # Errors
    /// [`EventHubError::Disposed`] after shutdown started.
    pub fn channel_count(&self) -> Result<usize, EventHubError> {
        self.inner.lifecycle.ensure_active()?;
        Ok(self.inner.channels.len())
    }

    /// Current lifecycle state. Like [`options`](Self::options) and
    /// [`metrics`](Self::metrics) it stays readable after the hub was closed.
    #[must_use]
    pub fn state(&self) -> HubState {
        self.inner.lifecycle.get()
    }

    #[must_use]
    pub fn options(&self) -> &HubOptions {
        &self.inner.options
    }

    /// Snapshot of the built-in metrics; `None` when metrics are disabled or an external
    /// sink was supplied. Still available once disposed, so final counters can be collected.
    #[must_use]
    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.inner.builtin_metrics.as_ref().map(|metrics| metrics.snapshot())
    }

    fn subscription(
        &self,
        id: SubscriptionId,
        event: Option<EventName>,
        kind: SubscriptionKind,
        payload: &'static str,
    ) -> Subscription {
        let owner: Weak<dyn SubscriptionOwner> = Arc::downgrade(&self.inner) as _;
        Subscription::new(id, event, kind, payload, owner)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("state", &self.inner.lifecycle.get())
            .field("subscribers", &self.inner.subscribers.load(Ordering::Relaxed))
            .field("channels", &self.inner.channels.len())
            .field("pending", &self.inner.in_flight.get())
            .finish_non_exhaustive()
    }
}

impl HubInner {
    fn next_id(&self) -> SubscriptionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn subscribed(&self) {
        let count = self.subscribers.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.set_subscriber_count(count);
    }

    fn admission<'a>(&'a self, caller: &'a CancellationToken) -> Admission<'a> {
        Admission {
            policy: self.options.full_queue_policy,
            timeout: self.options.backpressure_timeout(),
            caller,
            shutdown: &self.shutdown,
            lifecycle: &self.lifecycle,
            metrics: &*self.metrics,
        }
    }

    /// Fans `value` out to every matching data channel.
    ///
    /// The first item actually enqueued carries the wildcard notification. When no channel
    /// matches, or every match retired meanwhile, it goes through the signal queue instead.
    async fn publish_value(
        &self,
        name: EventName,
        value: Arc<dyn Event>,
        ctx: &CancellationToken,
    ) -> Result<(), EventHubError> {
        let targets = self.channels.targets(&name, &value);
        let admission = self.admission(ctx);

        if targets.is_empty() {
            trace!(event = %name, "No data channel matches, notifying wildcards only");
            let payload = Event::event_name(&*value);
            return self.signals.publish(name, payload, false, admission).await.map(drop);
        }

        let claim = WildcardClaim::default();
        let claim = &claim;
        let results = join_all(targets.into_iter().map(|target| async move {
            target.channel.admit(target.payload, claim, admission).await
        }))
        .await;

        let (mut admitted, mut dropped) = (0_usize, 0_usize);
        for result in results {
            match result? {
                Admitted::Enqueued => admitted += 1,
                Admitted::Dropped => dropped += 1,
                Admitted::Retired => {},
            }
        }
        if claim.is_open() && dropped == 0 {
            trace!(event = %name, "Every matching channel retired, notifying wildcards only");
            let payload = Event::event_name(&*value);
            return self.signals.publish(name, payload, false, admission).await.map(drop);
        }
        trace!(event = %name, channels = admitted, dropped, "Event published");
        Ok(())
    }

    /// Waits for every data channel, then flushes the signal queue with a barrier, until the
    /// whole hub reports no pending items.
    async fn quiesce(&self) -> Result<(), EventHubError> {
        loop {
            for channel in self.channels.all() {
                channel.pending().wait_idle().await;
            }
            self.signals.barrier().await?;
            self.signals.pending().wait_idle().await;

            if self.in_flight.get() == 0 {
                return Ok(());
            }
            trace!(pending = self.in_flight.get(), "Hub not idle yet, draining again");
            self.in_flight.wait_idle().await;
        }
    }
}

impl SubscriptionOwner for HubInner {
    fn unsubscribe(
        &self,
        id: SubscriptionId,
        event: Option<&EventName>,
        kind: SubscriptionKind,
    ) -> bool {
        if !self.lifecycle.is_active() {
            return false;
        }

        let removed = match (kind, event) {
            (SubscriptionKind::Signal, Some(name)) => self.signals.unsubscribe(name, id),
            (SubscriptionKind::Data(payload), Some(name)) => {
                let removed = self.channels.unsubscribe(name, payload, id);
                self.metrics.set_channel_count(self.channels.len());
                removed
            },
            (SubscriptionKind::Wildcard, _) => self.wildcards.remove(id).is_some(),
            (SubscriptionKind::Signal | SubscriptionKind::Data(_), None) => false,
        };

        if removed {
            let count = self.subscribers.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
            self.metrics.set_subscriber_count(count);
            debug!(id, event = ?event, "Subscription disposed");
        }
        removed
    }

    fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
