use std::borrow::Cow;

/// Errors surfaced to callers of the [`EventHub`](crate::EventHub).
///
/// Handler failures are never part of this type: they are caught at the dispatch
/// boundary, logged and counted.
#[derive(Debug, thiserror::Error)]
pub enum EventHubError {
    /// The hub has started shutting down (or is already disposed).
    #[error("Event hub disposed{}: {message}", format_context(.context))]
    Disposed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A bounded queue stayed full for longer than the configured backpressure timeout.
    #[error("Backpressure timeout{} for event '{event}' ({payload})", format_context(.context))]
    BackpressureTimeout {
        event: Cow<'static, str>,
        payload: Cow<'static, str>,
        context: Option<Cow<'static, str>>,
    },

    /// The publisher's cancellation token fired while waiting on the hub.
    #[error("Operation cancelled{}: {message}", format_context(.context))]
    Cancelled { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// `drain` did not observe an idle hub before its safety timeout elapsed.
    #[error("Drain timed out{}: {message}", format_context(.context))]
    DrainTimeout { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Capacity must be greater than zero for bounded queues.
    #[error("Invalid capacity{}: {message}", format_context(.context))]
    InvalidCapacity { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Event names must be non-empty.
    #[error("Invalid event name{}: {message}", format_context(.context))]
    InvalidEventName { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Configuration could not be loaded or deserialized.
    #[error("Config error{}: {source}", format_context(.context))]
    Config {
        #[source]
        source: config::ConfigError,
        context: Option<Cow<'static, str>>,
    },

    /// An internal invariant was violated (e.g. a payload reached a channel of another type).
    #[error("Internal fault{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl EventHubError {
    pub(crate) fn disposed() -> Self {
        Self::Disposed { message: "the hub no longer accepts operations".into(), context: None }
    }

    pub(crate) fn cancelled(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Cancelled { message: message.into(), context: None }
    }

    /// Returns `true` for [`EventHubError::BackpressureTimeout`].
    #[must_use]
    pub const fn is_backpressure_timeout(&self) -> bool {
        matches!(self, Self::BackpressureTimeout { .. })
    }

    /// Returns `true` for [`EventHubError::Disposed`].
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }
}

/// Adds human-readable context to fallible hub operations.
pub trait EventHubErrorExt<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EventHubError>;
}

impl<T> EventHubErrorExt<T> for Result<T, EventHubError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            match &mut e {
                EventHubError::Disposed { context: c, .. }
                | EventHubError::BackpressureTimeout { context: c, .. }
                | EventHubError::Cancelled { context: c, .. }
                | EventHubError::DrainTimeout { context: c, .. }
                | EventHubError::InvalidCapacity { context: c, .. }
                | EventHubError::InvalidEventName { context: c, .. }
                | EventHubError::Config { context: c, .. }
                | EventHubError::Internal { context: c, .. } => *c = Some(context.into()),
            }
            e
        })
    }
}

impl From<config::ConfigError> for EventHubError {
    #[inline]
    fn from(source: config::ConfigError) -> Self {
        Self::Config { source, context: None }
    }
}

impl<T> EventHubErrorExt<T> for Result<T, config::ConfigError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EventHubError> {
        self.map_err(|source| EventHubError::Config { source, context: Some(context.into()) })
    }
}

impl From<&'static str> for EventHubError {
    #[inline]
    fn from(s: &'static str) -> Self {
        Self::Internal { message: Cow::Borrowed(s), context: None }
    }
}

impl From<String> for EventHubError {
    #[inline]
    fn from(s: String) -> Self {
        Self::Internal { message: Cow::Owned(s), context: None }
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
