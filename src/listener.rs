//! Listener class synthesis and the process-wide class cache.
//!
//! The listener shape for an event type is the monomorphized
//! [`ForwardingListener<T>`]; the runtime artifact worth caching is the
//! [`ListenerClass`] descriptor that knows how to construct one from an
//! erased sink. Descriptors are synthesized at most once per event type
//! for the lifetime of the process and shared by every bridge, so
//! repeated requests for the same type are a cache hit and class identity
//! is stable no matter which bridge asked first.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use crate::bus::{AnyEvent, DeliveryMode, Listener};
use crate::error::{ListenerError, Result};
use crate::sink::EventSink;

/// Cached descriptor for the listener shape of one event type.
///
/// Two handles name the same class exactly when they came from the same
/// cache entry; [`class_for`] guarantees one entry per event type.
#[derive(Clone)]
pub(crate) struct ListenerClass {
    inner: Arc<ClassInner>,
}

struct ClassInner {
    event_type: TypeId,
    event_type_name: &'static str,
    construct: fn(Box<dyn Any + Send>) -> Result<Arc<dyn Listener>>,
}

impl ListenerClass {
    /// Type token of the event type this class listens for.
    pub(crate) fn event_type(&self) -> TypeId {
        self.inner.event_type
    }

    /// Diagnostic name of the event type.
    pub(crate) fn event_type_name(&self) -> &'static str {
        self.inner.event_type_name
    }

    /// Whether two handles name the same cached class.
    pub(crate) fn same_class(&self, other: &ListenerClass) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ListenerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerClass")
            .field("event_type", &self.inner.event_type_name)
            .finish()
    }
}

static CLASSES: OnceLock<RwLock<HashMap<TypeId, ListenerClass>>> = OnceLock::new();

fn cache() -> &'static RwLock<HashMap<TypeId, ListenerClass>> {
    CLASSES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolve the listener class for `T`, synthesizing it on first request.
///
/// Racing first requests serialize on the cache's write lock and all
/// observe the same entry, so at most one class per type ever exists.
pub(crate) fn class_for<T: Send + Sync + 'static>() -> ListenerClass {
    let key = TypeId::of::<T>();
    if let Some(class) = cache().read().unwrap().get(&key) {
        return class.clone();
    }
    cache()
        .write()
        .unwrap()
        .entry(key)
        .or_insert_with(synthesize::<T>)
        .clone()
}

fn synthesize<T: Send + Sync + 'static>() -> ListenerClass {
    debug!(
        event_type = std::any::type_name::<T>(),
        "synthesizing listener class"
    );
    ListenerClass {
        inner: Arc::new(ClassInner {
            event_type: TypeId::of::<T>(),
            event_type_name: std::any::type_name::<T>(),
            construct: construct_listener::<T>,
        }),
    }
}

/// Construct a listener instance of `class` bound to the erased sink.
///
/// The sink must be the [`EventSink`] for the class's own event type;
/// pairing a class with any other sink reports
/// [`ListenerError::SinkMismatch`].
pub(crate) fn instantiate(
    class: &ListenerClass,
    sink: Box<dyn Any + Send>,
) -> Result<Arc<dyn Listener>> {
    (class.inner.construct)(sink)
}

fn construct_listener<T: Send + Sync + 'static>(
    sink: Box<dyn Any + Send>,
) -> Result<Arc<dyn Listener>> {
    let sink = sink
        .downcast::<EventSink<T>>()
        .map_err(|_| ListenerError::SinkMismatch {
            expected: std::any::type_name::<T>(),
        })?;
    Ok(Arc::new(ForwardingListener { sink: *sink }))
}

/// The listener shape for event type `T`: forwards every matching post to
/// exactly one subscription's sink.
struct ForwardingListener<T: Send + Sync + 'static> {
    sink: EventSink<T>,
}

impl<T: Send + Sync + 'static> Listener for ForwardingListener<T> {
    fn event_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn delivery(&self) -> DeliveryMode {
        // Channel sends need no serialization.
        DeliveryMode::Concurrent
    }

    fn on_event(&self, event: &AnyEvent) {
        if let Some(value) = extract::<T>(event) {
            self.sink.emit(value);
        }
    }
}

/// Recover the typed payload, treating [`AnyEvent`] subscribers as a
/// match for every event.
fn extract<T: Send + Sync + 'static>(event: &AnyEvent) -> Option<Arc<T>> {
    if TypeId::of::<T>() == TypeId::of::<AnyEvent>() {
        let erased: Arc<dyn Any + Send + Sync> = Arc::new(event.clone());
        return erased.downcast::<T>().ok();
    }
    event.downcast::<T>()
}
