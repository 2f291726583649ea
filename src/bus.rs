//! In-process event bus with runtime-type dispatch.
//!
//! The bus routes each posted value to the listeners registered for its
//! exact type, plus any listeners registered for [`AnyEvent`], which acts
//! as the universal event type. A post nobody claims is wrapped in
//! [`DeadEvent`] and posted once more so diagnostics can pick it up.
//!
//! Dispatch is synchronous and runs on the posting thread. The registry
//! lock is held only while snapshotting the target list, never while
//! listener code runs, so posts from different threads proceed in
//! parallel and a listener may post re-entrantly.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, trace};

/// Type-erased envelope the bus passes to listeners.
///
/// Wraps the posted value together with the type token captured at the
/// post site. Subscribing to `AnyEvent` itself receives every value
/// posted to the bus, whatever its type.
#[derive(Clone)]
pub struct AnyEvent {
    payload: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl AnyEvent {
    pub(crate) fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            payload: Arc::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Type token of the wrapped value.
    pub fn event_type(&self) -> TypeId {
        self.type_id
    }

    /// Diagnostic name of the wrapped value's type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the wrapped value is a `T`.
    pub fn is<T: Send + Sync + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Recover the wrapped value as a shared `T`.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }
}

impl fmt::Debug for AnyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyEvent")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Wrapper posted for values no listener claimed.
///
/// Subscribe to this type to observe events that would otherwise vanish,
/// typically to flag missing registrations.
#[derive(Debug, Clone)]
pub struct DeadEvent {
    event: AnyEvent,
}

impl DeadEvent {
    pub(crate) fn new(event: AnyEvent) -> Self {
        Self { event }
    }

    /// The original, unclaimed event.
    pub fn event(&self) -> &AnyEvent {
        &self.event
    }
}

/// How the bus may enter a listener when posts race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// The listener may be invoked from several posting threads at once.
    Concurrent,
    /// Deliveries are fenced by a per-registration lock. The fence is not
    /// reentrant: a serialized listener must not post an event routed
    /// back to itself.
    Serialized,
}

/// A bus subscriber.
///
/// Implementors declare the event type they subscribe to and receive
/// every matching post through [`Listener::on_event`]. Declaring
/// [`AnyEvent`] subscribes to every post regardless of type.
pub trait Listener: Send + Sync {
    /// Type token of the event type this listener subscribes to.
    fn event_type(&self) -> TypeId;

    /// Delivery mode; serialized unless overridden.
    fn delivery(&self) -> DeliveryMode {
        DeliveryMode::Serialized
    }

    /// Deliver one event. Runs on the posting thread; panics propagate to
    /// the poster.
    fn on_event(&self, event: &AnyEvent);
}

/// Opaque handle naming one bus registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    listener: Arc<dyn Listener>,
    serial: Option<Arc<Mutex<()>>>,
}

/// In-process event bus dispatching posted values by runtime type.
///
/// Cloning is cheap and clones share the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    /// Registrations bucketed by subscribed type token.
    registry: RwLock<HashMap<TypeId, Vec<Registration>>>,
    /// Next registration id to assign.
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it receives matching posts until unregistered.
    pub fn register(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let serial = match listener.delivery() {
            DeliveryMode::Serialized => Some(Arc::new(Mutex::new(()))),
            DeliveryMode::Concurrent => None,
        };
        let key = listener.event_type();
        self.inner
            .registry
            .write()
            .unwrap()
            .entry(key)
            .or_default()
            .push(Registration { id, listener, serial });
        debug!(id = id.0, "listener registered");
        id
    }

    /// Remove a registration.
    ///
    /// Returns `false` when the id is not registered, which teardown paths
    /// treat as already-done rather than as an error.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut registry = self.inner.registry.write().unwrap();
        for bucket in registry.values_mut() {
            if let Some(pos) = bucket.iter().position(|r| r.id == id) {
                bucket.remove(pos);
                debug!(id = id.0, "listener unregistered");
                return true;
            }
        }
        debug!(id = id.0, "unregister ignored, id not registered");
        false
    }

    /// Number of live registrations.
    pub fn listener_count(&self) -> usize {
        self.inner
            .registry
            .read()
            .unwrap()
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Post a value to every listener subscribed to its type.
    ///
    /// Dispatch completes before this returns. A value no listener claims
    /// is wrapped in [`DeadEvent`] and posted once more. Posting an
    /// [`AnyEvent`] envelope re-posts the value it wraps.
    pub fn post<T: Send + Sync + 'static>(&self, value: T) {
        let boxed: Box<dyn Any + Send + Sync> = Box::new(value);
        let envelope = match boxed.downcast::<AnyEvent>() {
            Ok(event) => *event,
            Err(payload) => AnyEvent {
                payload: payload.into(),
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            },
        };
        self.dispatch(envelope);
    }

    fn dispatch(&self, event: AnyEvent) {
        let targets = self.snapshot(event.event_type());
        if targets.is_empty() {
            if event.is::<DeadEvent>() {
                trace!("dead event unclaimed, dropping");
            } else {
                trace!(type_name = event.type_name(), "no listeners, reposting as dead event");
                self.dispatch(AnyEvent::new(DeadEvent::new(event)));
            }
            return;
        }
        for registration in targets {
            match &registration.serial {
                Some(lock) => {
                    let _entered = lock.lock().unwrap();
                    registration.listener.on_event(&event);
                }
                None => registration.listener.on_event(&event),
            }
        }
    }

    /// Copy the target list out under the read lock so delivery runs
    /// without holding it.
    fn snapshot(&self, type_id: TypeId) -> Vec<Registration> {
        let registry = self.inner.registry.read().unwrap();
        let mut targets: Vec<Registration> = registry
            .get(&type_id)
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        let wildcard = TypeId::of::<AnyEvent>();
        if type_id != wildcard {
            targets.extend(registry.get(&wildcard).into_iter().flatten().cloned());
        }
        targets
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
