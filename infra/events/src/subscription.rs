use crate::event::EventName;
use arc_swap::ArcSwap;
use std::any::TypeId;
use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Registration identity. Two registrations of the same closure get different ids.
pub(crate) type SubscriptionId = u64;

#[derive(Clone)]
pub(crate) struct HandlerEntry<H> {
    pub(crate) id: SubscriptionId,
    pub(crate) handler: H,
}

/// Copy-on-write handler list.
///
/// Readers take a snapshot with a single atomic load; writers swap in a modified copy.
/// Dispatch never waits on subscribe/unsubscribe and vice versa.
pub(crate) struct HandlerList<H> {
    entries: ArcSwap<Vec<HandlerEntry<H>>>,
}

impl<H: Clone> HandlerList<H> {
    pub(crate) fn new() -> Self {
        Self { entries: ArcSwap::from_pointee(Vec::new()) }
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<HandlerEntry<H>>> {
        self.entries.load_full()
    }

    /// Appends a registration and returns the new handler count.
    pub(crate) fn push(&self, id: SubscriptionId, handler: H) -> usize {
        let previous = self.entries.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(HandlerEntry { id, handler: handler.clone() });
            next
        });
        previous.len() + 1
    }

    /// Removes the first registration with `id`.
    ///
    /// Returns the remaining handler count, or `None` if `id` was not registered.
    pub(crate) fn remove(&self, id: SubscriptionId) -> Option<usize> {
        let previous = self.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            if let Some(pos) = next.iter().position(|entry| entry.id == id) {
                next.remove(pos);
            }
            next
        });
        previous.iter().any(|entry| entry.id == id).then(|| previous.len() - 1)
    }

    pub(crate) fn clear(&self) {
        self.entries.store(Arc::new(Vec::new()));
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.load().len()
    }
}

impl<H> fmt::Debug for HandlerList<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerList").field("len", &self.entries.load().len()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionKind {
    Signal,
    Data(TypeId),
    Wildcard,
}

/// The side of the hub a [`Subscription`] talks back to.
pub(crate) trait SubscriptionOwner: Send + Sync {
    /// Returns `true` if the registration was found and removed.
    fn unsubscribe(&self, id: SubscriptionId, event: Option<&EventName>, kind: SubscriptionKind)
        -> bool;

    fn is_active(&self) -> bool;
}

/// Handle to one handler registration.
///
/// [`Subscription::dispose`] is the only way to remove the handler: dropping the handle
/// leaves the registration in place for the lifetime of the hub.
#[must_use = "dropping a Subscription does not unsubscribe; keep it to call dispose()"]
pub struct Subscription {
    id: SubscriptionId,
    event: Option<EventName>,
    kind: SubscriptionKind,
    payload: &'static str,
    disposed: AtomicBool,
    owner: Weak<dyn SubscriptionOwner>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        event: Option<EventName>,
        kind: SubscriptionKind,
        payload: &'static str,
        owner: Weak<dyn SubscriptionOwner>,
    ) -> Self {
        Self { id, event, kind, payload, disposed: AtomicBool::new(false), owner }
    }

    /// Removes this registration from the hub.
    ///
    /// Idempotent and safe to race: only the first call has an effect, and it returns
    /// `true` when that call actually removed a registration. Handler snapshots already
    /// taken by dispatch loops still complete.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.owner
            .upgrade()
            .is_some_and(|owner| owner.unsubscribe(self.id, self.event.as_ref(), self.kind))
    }

    /// `true` until disposed, or until the hub is shut down.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
            && self.owner.upgrade().is_some_and(|owner| owner.is_active())
    }

    /// Event name this subscription listens to; `None` for wildcard subscriptions.
    #[must_use]
    pub const fn event_name(&self) -> Option<&EventName> {
        self.event.as_ref()
    }

    /// Declared payload type name (`"signal"` for signal handlers, `"*"` for wildcards).
    #[must_use]
    pub const fn payload_type_name(&self) -> &'static str {
        self.payload
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("payload", &self.payload)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_remove_only_first_occurrence() {
        let list = HandlerList::new();
        assert_eq!(list.push(1, "a"), 1);
        assert_eq!(list.push(2, "b"), 2);
        assert_eq!(list.push(3, "a"), 3);

        assert_eq!(list.remove(1), Some(2));
        assert_eq!(list.remove(1), None);

        let handlers: Vec<_> = list.snapshot().iter().map(|e| e.handler).collect();
        assert_eq!(handlers, ["b", "a"]);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_writes() {
        let list = HandlerList::new();
        list.push(1, 10);
        let snapshot = list.snapshot();
        list.push(2, 20);
        list.remove(1);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(list.len(), 1);
        assert_eq!(list.snapshot()[0].handler, 20);
    }

    #[derive(Default)]
    struct Recorder {
        removed: Mutex<Vec<SubscriptionId>>,
    }

    impl SubscriptionOwner for Recorder {
        fn unsubscribe(
            &self,
            id: SubscriptionId,
            _event: Option<&EventName>,
            _kind: SubscriptionKind,
        ) -> bool {
            self.removed.lock().push(id);
            true
        }

        fn is_active(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_dispose_is_idempotent_across_threads() {
        let owner = Arc::new(Recorder::default());
        let weak: Weak<dyn SubscriptionOwner> = Arc::downgrade(&owner) as _;
        let subscription = Arc::new(Subscription::new(
            7,
            Some(EventName::from("Alive")),
            SubscriptionKind::Signal,
            "signal",
            weak,
        ));
        assert!(subscription.is_active());

        let wins: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let subscription = Arc::clone(&subscription);
                    scope.spawn(move || usize::from(subscription.dispose()))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(wins, 1);
        assert_eq!(*owner.removed.lock(), [7]);
        assert!(!subscription.is_active());
    }

    #[test]
    fn test_dispose_after_owner_dropped_is_a_no_op() {
        let owner: Arc<dyn SubscriptionOwner> = Arc::new(Recorder::default());
        let subscription =
            Subscription::new(1, None, SubscriptionKind::Wildcard, "*", Arc::downgrade(&owner));
        drop(owner);
        assert!(!subscription.is_active());
        assert!(!subscription.dispose());
    }
}
