//! # Courier Relay
//!
//! A line-oriented transport bridge: newline-delimited JSON envelopes are decoded into typed
//! messages and published into an in-process [`EventHub`](courier_events::EventHub).
//!
//! ```text
//! {"kind":"heartbeat","source":"edge-1","seq":1}
//! {"kind":"text","channel":"ops","body":"deploy finished"}
//! {"kind":"metric","name":"cpu","value":0.42}
//! {"kind":"signal","name":"Alive"}
//! ```
//!
//! ## Example
//! ```no_run
//! use courier_events::{CancellationToken, HubOptions};
//! use courier_relay::Relay;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let relay = Relay::start(HubOptions::default())?;
//!     let ctx = CancellationToken::new();
//!     let input = tokio::io::BufReader::new(tokio::io::stdin());
//!
//!     let stats = relay.pump(input, &ctx).await?;
//!     let snapshot = relay.finish(&ctx).await?;
//!     println!("{stats:?} {snapshot:?}");
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod message;
mod relay;

pub use args::Cli;
pub use config::RelayConfig;
pub use message::{Audited, Heartbeat, Inbound, MetricSample, Route, TextMessage};
pub use relay::{Relay, RelayStats};
