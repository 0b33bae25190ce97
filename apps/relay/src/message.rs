//! Wire envelopes accepted by the relay and the typed messages they decode into.

use anyhow::{Context, Result};
use courier_events::Event;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Messages that leave an audit trail. Every relayed data message implements it, and the
/// relay registers views so a single `dyn Audited` subscriber sees all of them.
pub trait Audited: Send + Sync {
    fn summary(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub source: String,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub channel: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
}

impl Audited for Heartbeat {
    fn summary(&self) -> String {
        format!("heartbeat #{} from {}", self.seq, self.source)
    }
}

impl Audited for TextMessage {
    fn summary(&self) -> String {
        format!("{} chars on #{}", self.body.chars().count(), self.channel)
    }
}

impl Audited for MetricSample {
    fn summary(&self) -> String {
        format!("{} = {}", self.name, self.value)
    }
}

/// One NDJSON line: `{"kind": "heartbeat", "source": "edge-1", "seq": 7}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inbound {
    Heartbeat(Heartbeat),
    Text(TextMessage),
    Metric(MetricSample),
    /// A payload-less signal, published under `name`.
    Signal { name: String },
}

/// Where a decoded envelope goes.
pub enum Route {
    Signal(String),
    /// Published under the payload's type name; the hub resolves the runtime type.
    Data(Arc<dyn Event>),
}

impl Inbound {
    /// Decodes one line.
    ///
    /// # Errors
    /// Fails for malformed JSON or an unknown `kind`.
    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line).with_context(|| format!("Malformed envelope: {line}"))
    }

    #[must_use]
    pub fn route(self) -> Route {
        match self {
            Self::Heartbeat(heartbeat) => Route::Data(Arc::new(heartbeat)),
            Self::Text(text) => Route::Data(Arc::new(text)),
            Self::Metric(sample) => Route::Data(Arc::new(sample)),
            Self::Signal { name } => Route::Signal(name),
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal(name) => f.debug_tuple("Signal").field(name).finish(),
            Self::Data(event) => f.debug_tuple("Data").field(&Event::event_name(&**event)).finish(),
        }
    }
}
