//! Event name -> payload type -> data channel.
//!
//! Creation and teardown both happen under the registry write lock, so a racing subscribe
//! either joins the live channel or creates a fresh one, never a retired one.

use crate::channel::{DataChannel, ErasedChannel};
use crate::error::EventHubError;
use crate::event::{Event, EventName, TypeViews};
use crate::handler::DataHandler;
use crate::state::Lifecycle;
use crate::subscription::SubscriptionId;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::sync::Arc;

type ChannelMap = FxHashMap<EventName, FxHashMap<TypeId, Arc<dyn ErasedChannel>>>;

/// A channel selected for one publish, together with the payload it must receive.
pub(crate) struct Target {
    pub(crate) channel: Arc<dyn ErasedChannel>,
    pub(crate) payload: Box<dyn Any + Send>,
}

#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    channels: RwLock<ChannelMap>,
    views: TypeViews,
}

impl ChannelRegistry {
    pub(crate) const fn views(&self) -> &TypeViews {
        &self.views
    }

    /// Adds `handler` to the channel for `(name, T)`, creating the channel if absent.
    ///
    /// Returns the channel when this call created it; the caller owns starting its loop.
    pub(crate) fn subscribe<T>(
        &self,
        name: &EventName,
        id: SubscriptionId,
        handler: DataHandler<T>,
        lifecycle: &Lifecycle,
        create: impl FnOnce() -> DataChannel<T>,
    ) -> Result<Option<Arc<DataChannel<T>>>, EventHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let mut channels = self.channels.write();
        lifecycle.ensure_active()?;

        let by_type = channels.entry(name.clone()).or_default();
        let mut created = None;
        let erased = by_type.entry(TypeId::of::<T>()).or_insert_with(|| {
            let channel = Arc::new(create());
            created = Some(Arc::clone(&channel));
            channel as Arc<dyn ErasedChannel>
        });

        let channel = Arc::clone(erased).as_any().downcast::<DataChannel<T>>().map_err(|_| {
            EventHubError::Internal {
                message: format!("channel for '{name}' has an unexpected payload type").into(),
                context: Some(std::any::type_name::<T>().into()),
            }
        })?;
        channel.add_handler(id, handler);
        Ok(created)
    }

    /// Removes one registration. A channel left without handlers is retired and dropped from
    /// the registry, and so is an event name left without channels.
    ///
    /// Returns `true` if the registration existed.
    pub(crate) fn unsubscribe(
        &self,
        name: &EventName,
        payload: TypeId,
        id: SubscriptionId,
    ) -> bool {
        let mut channels = self.channels.write();
        let Some(by_type) = channels.get_mut(name) else {
            return false;
        };
        let Some(remaining) = by_type.get(&payload).and_then(|channel| channel.remove_handler(id))
        else {
            return false;
        };

        if remaining == 0 {
            if let Some(channel) = by_type.remove(&payload) {
                channel.retire();
            }
            if by_type.is_empty() {
                channels.remove(name);
            }
        }
        true
    }

    /// Every channel under `name` whose declared type is the runtime type of `value`, or for
    /// which a view from that type was registered.
    pub(crate) fn targets(&self, name: &EventName, value: &Arc<dyn Event>) -> Vec<Target> {
        let source = Event::payload_type(&**value);
        let channels = self.channels.read();
        let Some(by_type) = channels.get(name) else {
            return Vec::new();
        };

        by_type
            .iter()
            .filter_map(|(declared, channel)| {
                let payload = if *declared == source {
                    Event::into_exact(Arc::clone(value))
                } else {
                    let view = self.views.resolve(source, *declared)?;
                    view(Event::into_any(Arc::clone(value)))?
                };
                Some(Target { channel: Arc::clone(channel), payload })
            })
            .collect()
    }

    pub(crate) fn channel(
        &self,
        name: &EventName,
        payload: TypeId,
    ) -> Option<Arc<dyn ErasedChannel>> {
        self.channels.read().get(name).and_then(|by_type| by_type.get(&payload)).cloned()
    }

    pub(crate) fn channels_for(&self, name: &EventName) -> Vec<Arc<dyn ErasedChannel>> {
        self.channels
            .read()
            .get(name)
            .map(|by_type| by_type.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn all(&self) -> Vec<Arc<dyn ErasedChannel>> {
        self.channels.read().values().flat_map(|by_type| by_type.values().cloned()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.read().values().map(FxHashMap::len).sum()
    }

    /// Shuts every channel down and empties the registry.
    pub(crate) fn shutdown(&self) {
        let channels = std::mem::take(&mut *self.channels.write());
        for channel in channels.into_values().flat_map(FxHashMap::into_values) {
            channel.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::data_handler;
    use crate::pending::PendingGauge;

    trait Sequence: Send + Sync {
        fn items(&self) -> usize;
    }

    struct Batch(Vec<u8>);
    impl Sequence for Batch {
        fn items(&self) -> usize {
            self.0.len()
        }
    }

    fn noop<T: ?Sized + Send + Sync + 'static>() -> DataHandler<T> {
        data_handler(|_: Arc<T>, _| async { Ok(()) })
    }

    fn subscribe<T: ?Sized + Send + Sync + 'static>(
        registry: &ChannelRegistry,
        name: &EventName,
        id: SubscriptionId,
    ) -> bool {
        let create = || DataChannel::new(name.clone(), None, PendingGauge::new());
        registry.subscribe::<T>(name, id, noop::<T>(), &Lifecycle::new(), create).unwrap().is_some()
    }

    #[test]
    fn test_channel_created_once_and_retired_with_last_handler() {
        let registry = ChannelRegistry::default();
        let name = EventName::from("Tick");

        assert!(subscribe::<i32>(&registry, &name, 1));
        assert!(!subscribe::<i32>(&registry, &name, 2));
        assert!(subscribe::<u64>(&registry, &name, 3));
        assert_eq!(registry.len(), 2);

        assert!(registry.unsubscribe(&name, TypeId::of::<i32>(), 1));
        assert_eq!(registry.len(), 2);
        assert!(registry.unsubscribe(&name, TypeId::of::<i32>(), 2));
        assert_eq!(registry.len(), 1);
        assert!(!registry.unsubscribe(&name, TypeId::of::<i32>(), 2));

        assert!(registry.unsubscribe(&name, TypeId::of::<u64>(), 3));
        assert!(registry.channels.read().is_empty());
    }

    #[test]
    fn test_targets_follow_exact_type_and_views() {
        let registry = ChannelRegistry::default();
        let name = EventName::from("Batch");
        subscribe::<Batch>(&registry, &name, 1);
        subscribe::<dyn Sequence>(&registry, &name, 2);
        subscribe::<String>(&registry, &name, 3);

        let value: Arc<dyn Event> = Arc::new(Batch(vec![1, 2, 3]));
        assert_eq!(registry.targets(&name, &value).len(), 1);

        registry.views().register::<Batch, dyn Sequence, _>(|batch| batch as Arc<dyn Sequence>);
        let targets = registry.targets(&name, &value);
        assert_eq!(targets.len(), 2);

        let sequence = targets
            .iter()
            .find_map(|t| t.payload.downcast_ref::<Arc<dyn Sequence>>())
            .unwrap();
        assert_eq!(sequence.items(), 3);
    }

    #[test]
    fn test_subscribe_rejected_after_shutdown_started() {
        let registry = ChannelRegistry::default();
        let lifecycle = Lifecycle::new();
        lifecycle.begin_shutdown().unwrap();
        let name = EventName::from("Tick");

        let create = || DataChannel::new(name.clone(), None, PendingGauge::new());
        let result = registry.subscribe::<i32>(&name, 1, noop::<i32>(), &lifecycle, create);
        assert!(result.unwrap_err().is_disposed());
        assert_eq!(registry.len(), 0);
    }
}
