use crate::message::{Audited, Heartbeat, Inbound, MetricSample, Route, TextMessage};
use anyhow::{Context, Result};
use courier_events::{
    CancellationToken, Event, EventHub, EventHubError, EventName, HubOptions, MetricsSnapshot,
    Subscription,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Counters for one relay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Data envelopes handed to the hub.
    pub forwarded: u64,
    pub signals: u64,
    /// Lines that could not be decoded.
    pub rejected: u64,
}

/// Decodes inbound envelopes and publishes them into an [`EventHub`].
///
/// Every relayed event is logged through a wildcard subscription, and every data message is
/// audited through a single `dyn Audited` subscriber reached via type views.
#[derive(Debug)]
pub struct Relay {
    hub: EventHub,
    audited: Arc<AtomicU64>,
    subscriptions: Vec<Subscription>,
}

impl Relay {
    /// Builds the hub and wires the relay's own subscribers.
    ///
    /// # Errors
    /// Fails for invalid hub options or outside a Tokio runtime.
    pub fn start(options: HubOptions) -> Result<Self> {
        let hub = EventHub::new(options).context("Failed to start the event hub")?;
        let audited = Arc::new(AtomicU64::new(0));

        hub.register_view::<Heartbeat, dyn Audited, _>(|m| m as Arc<dyn Audited>)?;
        hub.register_view::<TextMessage, dyn Audited, _>(|m| m as Arc<dyn Audited>)?;
        hub.register_view::<MetricSample, dyn Audited, _>(|m| m as Arc<dyn Audited>)?;

        let mut subscriptions = vec![hub.subscribe_all(|name, _| async move {
            info!(event = %name, "Event relayed");
            Ok(())
        })?];

        for name in [
            EventName::of::<Heartbeat>(),
            EventName::of::<TextMessage>(),
            EventName::of::<MetricSample>(),
        ] {
            let audited = Arc::clone(&audited);
            subscriptions.push(hub.subscribe::<dyn Audited, _, _>(name, move |message, _| {
                let audited = Arc::clone(&audited);
                async move {
                    debug!(summary = %message.summary(), "Audited");
                    audited.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            })?);
        }

        Ok(Self { hub, audited, subscriptions })
    }

    #[must_use]
    pub const fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Data messages the audit subscriber has processed so far.
    #[must_use]
    pub fn audited(&self) -> u64 {
        self.audited.load(Ordering::Relaxed)
    }

    /// Decodes and publishes one line. Blank lines are skipped, malformed ones are logged
    /// and counted as rejected.
    ///
    /// # Errors
    /// Propagates hub errors (disposed, backpressure timeout, cancellation).
    pub async fn forward(
        &self,
        line: &str,
        ctx: &CancellationToken,
        stats: &mut RelayStats,
    ) -> Result<(), EventHubError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let inbound = match Inbound::decode(line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Envelope rejected");
                stats.rejected += 1;
                return Ok(());
            },
        };

        match inbound.route() {
            Route::Signal(name) => {
                self.hub.publish_signal(name, ctx).await?;
                stats.signals += 1;
            },
            Route::Data(event) => {
                debug!(event = Event::event_name(&*event), "Forwarding envelope");
                self.hub.publish_dyn(event, ctx).await?;
                stats.forwarded += 1;
            },
        }
        Ok(())
    }

    /// Forwards every line of `reader` until EOF or until `ctx` is cancelled.
    ///
    /// # Errors
    /// Fails on read errors and on hub errors other than cancellation.
    pub async fn pump<R>(&self, reader: R, ctx: &CancellationToken) -> Result<RelayStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut stats = RelayStats::default();
        let mut lines = reader.lines();

        loop {
            let line = tokio::select! {
                biased;
                () = ctx.cancelled() => {
                    info!("Input interrupted");
                    break;
                },
                line = lines.next_line() => line.context("Failed to read input")?,
            };
            let Some(line) = line else { break };

            match self.forward(&line, ctx, &mut stats).await {
                Ok(()) => {},
                Err(EventHubError::Cancelled { .. }) => break,
                Err(e) => return Err(e).context("Failed to forward envelope"),
            }
        }

        info!(
            forwarded = stats.forwarded,
            signals = stats.signals,
            rejected = stats.rejected,
            "Input finished"
        );
        Ok(stats)
    }

    /// Drains the hub, takes the final metrics snapshot and shuts the hub down.
    ///
    /// A drain timeout is logged and shutdown proceeds anyway.
    ///
    /// # Errors
    /// Fails if the hub was already closed.
    pub async fn finish(self, ctx: &CancellationToken) -> Result<Option<MetricsSnapshot>> {
        match self.hub.drain(ctx).await {
            Ok(()) => {},
            Err(e @ (EventHubError::DrainTimeout { .. } | EventHubError::Cancelled { .. })) => {
                warn!(error = %e, "Shutting down without a complete drain");
            },
            Err(e) => return Err(e).context("Failed to drain the event hub"),
        }

        let snapshot = self.hub.metrics();
        for subscription in &self.subscriptions {
            subscription.dispose();
        }
        self.hub.close().await.context("Failed to close the event hub")?;
        Ok(snapshot)
    }
}
