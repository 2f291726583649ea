//! Bridges the bus to lazily-subscribed async streams.
//!
//! [`EventBusBridge::events`] resolves the listener class for the
//! requested event type up front and returns a cold [`EventSequence`].
//! Nothing touches the bus until [`EventSequence::subscribe`], which
//! builds the subscription's channel, binds a fresh listener instance to
//! the bus, and returns an [`EventStream`] that unregisters the listener
//! exactly once when it is unsubscribed or dropped.

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use tokio_stream::Stream;
use tracing::debug;

use crate::bus::{EventBus, ListenerId};
use crate::error::Result;
use crate::listener::{self, ListenerClass};
use crate::sink::{self, OverflowPolicy, SinkSource};

/// Bridges an [`EventBus`] to typed async streams.
#[derive(Debug, Clone)]
pub struct EventBusBridge {
    bus: EventBus,
}

impl EventBusBridge {
    /// Create a bridge over `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Sequence of every `T` posted to the bus, buffering without bound.
    ///
    /// Shorthand for [`events_with`](Self::events_with) with
    /// [`OverflowPolicy::Buffer`].
    #[must_use]
    pub fn events<T: Send + Sync + 'static>(&self) -> EventSequence<T> {
        self.events_with(OverflowPolicy::default())
    }

    /// Sequence of every `T` posted to the bus, under `policy`.
    ///
    /// Resolves the listener class for `T` immediately so the synthesis
    /// cost is paid here, once, and not per subscription. The bus itself
    /// is not touched until the returned sequence is subscribed.
    #[must_use]
    pub fn events_with<T: Send + Sync + 'static>(
        &self,
        policy: OverflowPolicy,
    ) -> EventSequence<T> {
        EventSequence {
            bus: self.bus.clone(),
            class: listener::class_for::<T>(),
            policy,
            _marker: PhantomData,
        }
    }
}

/// A cold, reusable description of one subscription's shape.
///
/// Cloning is cheap, and subscribing twice yields two independent
/// subscriptions, each with its own listener registration and buffer.
pub struct EventSequence<T> {
    bus: EventBus,
    class: ListenerClass,
    policy: OverflowPolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> EventSequence<T> {
    /// Bind a fresh listener to the bus and start receiving events.
    ///
    /// Registration happens here, not at construction. Dropping the
    /// returned stream (or calling [`EventStream::unsubscribe`])
    /// unregisters the listener again.
    pub fn subscribe(&self) -> Result<EventStream<T>> {
        let (sink, source) = sink::channel::<T>(self.policy);
        let instance = listener::instantiate(&self.class, Box::new(sink))?;
        let id = self.bus.register(instance);
        debug!(event_type = self.class.event_type_name(), "subscribed");
        Ok(EventStream {
            source,
            guard: RegistrationGuard {
                bus: self.bus.clone(),
                id,
                released: AtomicBool::new(false),
            },
        })
    }

    /// The overflow policy subscriptions from this sequence use.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

impl<T> Clone for EventSequence<T> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            class: self.class.clone(),
            policy: self.policy,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for EventSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSequence")
            .field("event_type", &self.class.event_type_name())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Live subscription yielding posted events as a [`Stream`].
///
/// Values arrive as `Arc<T>` because the bus hands one shared value to
/// every listener. The stream ends once the subscription is released and
/// whatever the policy buffered has drained.
pub struct EventStream<T> {
    source: SinkSource<T>,
    guard: RegistrationGuard,
}

impl<T: Send + Sync + 'static> EventStream<T> {
    /// Release the bus registration now instead of at drop.
    ///
    /// Idempotent; later calls and the eventual drop do nothing.
    pub fn unsubscribe(&mut self) {
        self.guard.release();
    }
}

impl<T: Send + Sync + 'static> Stream for EventStream<T> {
    type Item = Arc<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().source).poll_next(cx)
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.guard.id)
            .finish_non_exhaustive()
    }
}

/// Unregisters a listener exactly once, from whichever exit runs first.
struct RegistrationGuard {
    bus: EventBus,
    id: ListenerId,
    released: AtomicBool,
}

impl RegistrationGuard {
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.bus.unregister(self.id) {
            debug!(id = ?self.id, "listener was already unregistered");
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.release();
    }
}
