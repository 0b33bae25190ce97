use crate::error::EventHubError;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Payload name reported for signal (data-less) events.
pub(crate) const SIGNAL_PAYLOAD: &str = "signal";

/// Marker trait for values that can be published through the [`EventHub`](crate::EventHub).
///
/// Any `Send + Sync + 'static` type implements it automatically. The trait is object safe so
/// transport adapters can forward values whose concrete type they do not know via
/// [`EventHub::publish_dyn`](crate::EventHub::publish_dyn).
///
/// Call the methods through the trait (`Event::event_name(&*value)`) when holding an
/// `Arc<dyn Event>`: the `Arc` is itself an `Event`.
pub trait Event: Any + Send + Sync + 'static {
    /// Fully qualified type name, used as the default event name.
    fn event_name(&self) -> &'static str;

    /// [`TypeId`] of the concrete payload.
    fn payload_type(&self) -> TypeId;

    /// Re-wraps the value for channels declared with exactly this type.
    #[doc(hidden)]
    fn into_exact(self: Arc<Self>) -> Box<dyn Any + Send>;

    /// Erases the value for registered [views](crate::EventHub::register_view).
    #[doc(hidden)]
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn event_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn payload_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn into_exact(self: Arc<Self>) -> Box<dyn Any + Send> {
        Box::new(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A non-empty event identifier. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventName(Arc<str>);

impl EventName {
    /// Creates a validated event name.
    ///
    /// # Errors
    /// Returns [`EventHubError::InvalidEventName`] for empty or whitespace-only names.
    pub fn new(name: impl Into<Self>) -> Result<Self, EventHubError> {
        let name = name.into();
        name.validate()?;
        Ok(name)
    }

    /// The default event name for payload type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(Arc::from(std::any::type_name::<T>()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn validate(&self) -> Result<(), EventHubError> {
        if self.0.trim().is_empty() {
            return Err(EventHubError::InvalidEventName {
                message: "event name must not be empty".into(),
                context: None,
            });
        }
        Ok(())
    }
}

impl Deref for EventName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for EventName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EventName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<&str> for EventName {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for EventName {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&String> for EventName {
    fn from(value: &String) -> Self {
        Self(Arc::from(value.as_str()))
    }
}

impl From<Arc<str>> for EventName {
    fn from(value: Arc<str>) -> Self {
        Self(value)
    }
}

impl From<&Self> for EventName {
    fn from(value: &Self) -> Self {
        value.clone()
    }
}

impl PartialEq<str> for EventName {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for EventName {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

pub(crate) type ErasedPayload = Arc<dyn Any + Send + Sync>;
type ViewFn = Arc<dyn Fn(ErasedPayload) -> Option<Box<dyn Any + Send>> + Send + Sync>;

/// Explicit "published type `S` may be delivered as `T`" relations.
///
/// Replaces runtime assignability checks: every relation is declared once with static type
/// information, and fan-out only consults this table.
#[derive(Default)]
pub(crate) struct TypeViews {
    views: RwLock<FxHashMap<(TypeId, TypeId), ViewFn>>,
}

impl TypeViews {
    pub(crate) fn register<S, T, F>(&self, view: F)
    where
        S: Event,
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<S>) -> Arc<T> + Send + Sync + 'static,
    {
        let erased: ViewFn = Arc::new(move |payload: ErasedPayload| {
            payload.downcast::<S>().ok().map(|source| Box::new(view(source)) as Box<dyn Any + Send>)
        });
        self.views.write().insert((TypeId::of::<S>(), TypeId::of::<T>()), erased);
    }

    pub(crate) fn resolve(&self, source: TypeId, target: TypeId) -> Option<ViewFn> {
        self.views.read().get(&(source, target)).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.views.read().len()
    }
}

impl fmt::Debug for TypeViews {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeViews").field("views", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shape: Send + Sync {
        fn sides(&self) -> usize;
    }

    struct Square;
    impl Shape for Square {
        fn sides(&self) -> usize {
            4
        }
    }

    #[test]
    fn test_event_name_rejects_blank() {
        assert!(EventName::new("Alive").is_ok());
        assert!(matches!(EventName::new(""), Err(EventHubError::InvalidEventName { .. })));
        assert!(matches!(EventName::new("   "), Err(EventHubError::InvalidEventName { .. })));
    }

    #[test]
    fn test_dyn_event_reports_concrete_type() {
        let value: Arc<dyn Event> = Arc::new(42_u32);
        assert_eq!(Event::payload_type(&*value), TypeId::of::<u32>());
        assert_eq!(Event::event_name(&*value), "u32");

        let exact = Event::into_exact(value);
        assert_eq!(**exact.downcast::<Arc<u32>>().unwrap(), 42);
    }

    #[test]
    fn test_view_projects_to_trait_object() {
        let views = TypeViews::default();
        views.register::<Square, dyn Shape, _>(|square| square as Arc<dyn Shape>);

        let source = TypeId::of::<Square>();
        let target = TypeId::of::<dyn Shape>();
        assert!(views.resolve(target, source).is_none());

        let view = views.resolve(source, target).unwrap();
        let projected = view(Arc::new(Square) as ErasedPayload).unwrap();
        let shape = projected.downcast::<Arc<dyn Shape>>().unwrap();
        assert_eq!(shape.sides(), 4);
    }
}
