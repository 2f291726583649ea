//! streambus: typed in-process event bus with stream-based subscriptions
//!
//! This crate connects two worlds: an [`EventBus`] that synchronously
//! dispatches posted values to listeners by runtime type, and async
//! consumers that want those values as a [`Stream`](tokio_stream::Stream).
//! The expensive part, synthesizing the listener shape for an event type,
//! happens once per type and is cached process-wide. Bus registration is
//! tied to subscription lifetime: a listener is bound when a sequence is
//! subscribed and unbound exactly once when the subscription ends.
//!
//! - **Bus** - [`EventBus`] with runtime-type routing, an [`AnyEvent`]
//!   universal channel, and [`DeadEvent`] wrapping for unclaimed posts
//! - **Bridge** - [`EventBusBridge`] producing cold [`EventSequence`]s
//!   that register with the bus only when subscribed
//! - **Overflow policies** - [`OverflowPolicy`] maps each subscription
//!   onto a channel flavor: buffer everything, keep the latest, or drop
//!   past a capacity
//!
//! # Quick Start
//!
//! ```
//! use streambus::{EventBus, EventBusBridge};
//! use tokio_stream::StreamExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> streambus::Result<()> {
//! let bus = EventBus::new();
//! let bridge = EventBusBridge::new(bus.clone());
//!
//! // Cold: nothing is registered with the bus yet.
//! let ticks = bridge.events::<u32>();
//!
//! // Registration happens at subscribe.
//! let mut stream = ticks.subscribe()?;
//! bus.post(7u32);
//!
//! assert_eq!(stream.next().await.as_deref(), Some(&7));
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      EventBusBridge                      │
//! │   events::<T>() ──► class cache (one class per type)     │
//! │        │                                                 │
//! │        ▼                                                 │
//! │   EventSequence<T> ── subscribe() ──► EventStream<T>     │
//! │                          │    ▲                          │
//! │                  register│    │events (channel)          │
//! │                          ▼    │                          │
//! │                       EventBus ◄── post(value)           │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod bus;
pub mod error;

mod listener;
mod sink;

// Re-exports
pub use bridge::{EventBusBridge, EventSequence, EventStream};
pub use bus::{AnyEvent, DeadEvent, DeliveryMode, EventBus, Listener, ListenerId};
pub use error::{ListenerError, Result};
pub use sink::OverflowPolicy;
