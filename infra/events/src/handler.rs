use crate::event::EventName;
use crate::metrics::{MetricKey, MetricsSink};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// What every handler returns. An `Err` (or a panic) is a handler error: logged and counted,
/// never propagated to the publisher.
pub type HandlerResult = anyhow::Result<()>;

pub(crate) type HandlerFuture = BoxFuture<'static, HandlerResult>;

pub(crate) type SignalHandler = Arc<dyn Fn(CancellationToken) -> HandlerFuture + Send + Sync>;
pub(crate) type DataHandler<T> =
    Arc<dyn Fn(Arc<T>, CancellationToken) -> HandlerFuture + Send + Sync>;
pub(crate) type WildcardHandler =
    Arc<dyn Fn(EventName, CancellationToken) -> HandlerFuture + Send + Sync>;

/// A handler call bound to its arguments, not started yet.
pub(crate) type Invocation = Box<dyn FnOnce() -> HandlerFuture + Send>;

pub(crate) fn signal_handler<F, Fut>(handler: F) -> SignalHandler
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |token| handler(token).boxed())
}

pub(crate) fn data_handler<T, F, Fut>(handler: F) -> DataHandler<T>
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(Arc<T>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |payload, token| handler(payload, token).boxed())
}

pub(crate) fn wildcard_handler<F, Fut>(handler: F) -> WildcardHandler
where
    F: Fn(EventName, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |name, token| handler(name, token).boxed())
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HandlerFailure {
    #[error("{0:#}")]
    Failed(anyhow::Error),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Runs one handler to completion, isolating errors and panics.
///
/// Failures observed after `token` fired are expected cancellations (shutdown or publisher
/// cancellation) and are only logged at debug level.
pub(crate) async fn invoke(
    call: Invocation,
    key: MetricKey<'_>,
    token: &CancellationToken,
    metrics: &dyn MetricsSink,
) {
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result.map_err(HandlerFailure::Failed),
            Err(panic) => Err(HandlerFailure::Panicked(panic_message(panic.as_ref()))),
        },
        Err(panic) => Err(HandlerFailure::Panicked(panic_message(panic.as_ref()))),
    };

    let Err(failure) = outcome else {
        return;
    };

    if token.is_cancelled() {
        debug!(event = key.event, payload = key.payload, %failure, "Handler stopped by cancellation");
        return;
    }

    metrics.increment_handler_error(key);
    error!(event = key.event, payload = key.payload, %failure, "Event handler failed");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::AtomicMetrics;

    const KEY: MetricKey<'static> = MetricKey::new("Alive", "signal");

    fn call(handler: &SignalHandler, token: &CancellationToken) -> Invocation {
        let handler = Arc::clone(handler);
        let token = token.clone();
        Box::new(move || handler(token))
    }

    #[tokio::test]
    async fn test_error_is_counted() {
        let metrics = AtomicMetrics::new();
        let token = CancellationToken::new();
        let handler = signal_handler(|_| async { Err(anyhow::anyhow!("boom")) });

        invoke(call(&handler, &token), KEY, &token, &metrics).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.event("Alive", "signal").unwrap().handler_errors, 1);
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_counted() {
        let metrics = AtomicMetrics::new();
        let token = CancellationToken::new();
        let in_future = signal_handler(|_| async { panic!("inside future") });
        let before_future: SignalHandler =
            Arc::new(|_: CancellationToken| -> HandlerFuture { panic!("before future") });

        invoke(call(&in_future, &token), KEY, &token, &metrics).await;
        invoke(call(&before_future, &token), KEY, &token, &metrics).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.event("Alive", "signal").unwrap().handler_errors, 2);
    }

    #[tokio::test]
    async fn test_failure_after_cancellation_is_not_an_error() {
        let metrics = AtomicMetrics::new();
        let token = CancellationToken::new();
        token.cancel();
        let handler = signal_handler(|token: CancellationToken| async move {
            token.cancelled().await;
            Err(anyhow::anyhow!("cancelled"))
        });

        invoke(call(&handler, &token), KEY, &token, &metrics).await;

        assert!(metrics.snapshot().event("Alive", "signal").is_none());
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
