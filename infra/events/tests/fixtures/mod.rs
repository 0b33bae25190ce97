use courier_events::{CancellationToken, EventHub, EventName, HandlerResult};
use futures::future::{Ready, ready};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Hub with a short drain timeout so a broken test fails fast instead of hanging.
pub fn hub() -> EventHub {
    EventHub::builder()
        .drain_timeout(Duration::from_secs(5))
        .shutdown_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

pub fn ctx() -> CancellationToken {
    CancellationToken::new()
}

/// Counts handler invocations.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn signal(
        &self,
    ) -> impl Fn(CancellationToken) -> Ready<HandlerResult> + Send + Sync + 'static {
        let count = Arc::clone(&self.0);
        move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            ready(Ok(()))
        }
    }

    pub fn data<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> impl Fn(Arc<T>, CancellationToken) -> Ready<HandlerResult> + Send + Sync + 'static {
        let count = Arc::clone(&self.0);
        move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
            ready(Ok(()))
        }
    }
}

/// Records what handlers observed, in delivery order.
#[derive(Debug)]
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn push(&self, value: T) {
        self.0.lock().push(value);
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn values(
        &self,
    ) -> impl Fn(Arc<T>, CancellationToken) -> Ready<HandlerResult> + Send + Sync + 'static
    where
        T: Sync,
    {
        let seen = Arc::clone(&self.0);
        move |value, _| {
            seen.lock().push((*value).clone());
            ready(Ok(()))
        }
    }
}

impl Recorder<String> {
    pub fn names(
        &self,
    ) -> impl Fn(EventName, CancellationToken) -> Ready<HandlerResult> + Send + Sync + 'static {
        let seen = Arc::clone(&self.0);
        move |name, _| {
            seen.lock().push(name.to_string());
            ready(Ok(()))
        }
    }

    pub fn sorted(&self) -> Vec<String> {
        let mut names = self.take();
        names.sort();
        names
    }
}

/// A sequence of numbers, implemented by two unrelated concrete types.
pub trait Sequence: Send + Sync {
    fn items(&self) -> Vec<u32>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch(pub Vec<u32>);

impl Sequence for Batch {
    fn items(&self) -> Vec<u32> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring(pub VecDeque<u32>);

impl Sequence for Ring {
    fn items(&self) -> Vec<u32> {
        self.0.iter().copied().collect()
    }
}

/// Lets `Batch` and `Ring` publishes reach `dyn Sequence` subscribers.
pub fn register_sequences(hub: &EventHub) {
    hub.register_view::<Batch, dyn Sequence, _>(|batch| batch as Arc<dyn Sequence>).unwrap();
    hub.register_view::<Ring, dyn Sequence, _>(|ring| ring as Arc<dyn Sequence>).unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub seq: u32,
}
