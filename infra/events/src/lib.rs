//! # Courier Events
//!
//! An in-process, asynchronous publish/subscribe hub that decouples transport adapters,
//! domain workers and monitoring consumers living in one process.
//!
//! ## Overview
//!
//! * **Signals**: named events without payload, queued through one FIFO signal channel.
//! * **Data events**: named events carrying a typed payload. Every `(event name, payload type)`
//!   pair gets its own queue and consumer loop, created with the first subscriber and
//!   retired with the last one, so a slow consumer of one type never stalls another.
//! * **Wildcards**: "subscribe to all" handlers notified with the event name of every
//!   signal and data publish, after the typed handlers of that item ran.
//! * **Type views**: explicit `S -> T` projections (usually into a `dyn Trait`) replace
//!   runtime assignability; a publish of `S` reaches subscribers of `S` and of every `T`
//!   it has a view into.
//! * **Backpressure**: unbounded queues, or bounded ones that block up to a timeout or drop
//!   the oldest/newest item.
//! * **Drain and shutdown**: [`EventHub::drain`] waits until nothing is pending anywhere;
//!   [`EventHub::close`] walks the hub through `Active -> ShuttingDown -> Disposed`.
//!
//! Handler failures (errors and panics) are caught at the dispatch boundary, logged through
//! `tracing` and counted by the [`MetricsSink`]; they never reach publishers.
//!
//! # Example
//!
//! ```rust
//! use courier_events::{CancellationToken, EventHub, EventHubError};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EventHubError> {
//!     let hub = EventHub::builder().max_queue_capacity(64).build()?;
//!     let seen = Arc::new(AtomicUsize::new(0));
//!
//!     let counter = Arc::clone(&seen);
//!     let alive = hub.subscribe_signal("Alive", move |_| {
//!         let counter = Arc::clone(&counter);
//!         async move {
//!             counter.fetch_add(1, Ordering::SeqCst);
//!             Ok(())
//!         }
//!     })?;
//!
//!     let ctx = CancellationToken::new();
//!     hub.publish_signal("Alive", &ctx).await?;
//!     hub.drain(&ctx).await?;
//!     assert_eq!(seen.load(Ordering::SeqCst), 1);
//!
//!     alive.dispose();
//!     hub.close().await
//! }
//! ```

mod backpressure;
mod channel;
mod config;
mod dispatch;
mod error;
mod event;
mod handler;
mod hub;
mod metrics;
mod pending;
mod queue;
mod registry;
mod signal;
mod state;
mod subscription;

pub use config::{ENV_PREFIX, FullQueuePolicy, HubOptions, load_config};
pub use error::{EventHubError, EventHubErrorExt};
pub use event::{Event, EventName};
pub use handler::HandlerResult;
pub use hub::{EventHub, HubBuilder};
pub use metrics::{
    AtomicMetrics, EventMetrics, MetricKey, MetricsSink, MetricsSnapshot, NoopMetrics,
};
pub use state::HubState;
pub use subscription::Subscription;
pub use tokio_util::sync::CancellationToken;
