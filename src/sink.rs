//! Overflow policies and the channel pair behind each subscription.
//!
//! Every policy maps onto a tokio channel flavor; this module adds no
//! buffering of its own. The emit half never blocks: delivery into a full
//! bounded channel drops the arrival, and delivery into a closed channel
//! means the subscriber tore down while a post was in flight, which is
//! tolerated.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, watch};
use tokio_stream::Stream;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream, WatchStream};
use tracing::trace;

/// What happens to events that arrive faster than the subscriber drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Buffer every event without bound.
    ///
    /// Nothing is ever dropped; a subscriber that stops polling grows the
    /// buffer without limit.
    #[default]
    Buffer,

    /// Keep only the most recent event. A lagging subscriber skips
    /// intermediate values and observes the newest one on its next poll.
    Latest,

    /// Buffer up to `capacity` events and drop new arrivals while full.
    DropNewest {
        /// Buffered events before arrivals are dropped. Zero is treated
        /// as one.
        capacity: usize,
    },
}

/// Build the sink/source pair for one subscription under `policy`.
pub(crate) fn channel<T: Send + Sync + 'static>(
    policy: OverflowPolicy,
) -> (EventSink<T>, SinkSource<T>) {
    match policy {
        OverflowPolicy::Buffer => {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                EventSink(SinkInner::Unbounded(tx)),
                SinkSource(SourceInner::Unbounded(UnboundedReceiverStream::new(rx))),
            )
        }
        OverflowPolicy::Latest => {
            let (tx, rx) = watch::channel(None);
            (
                EventSink(SinkInner::Latest(tx)),
                SinkSource(SourceInner::Latest(WatchStream::new(rx))),
            )
        }
        OverflowPolicy::DropNewest { capacity } => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (
                EventSink(SinkInner::Bounded(tx)),
                SinkSource(SourceInner::Bounded(ReceiverStream::new(rx))),
            )
        }
    }
}

/// Emit half, owned by the forwarding listener bound to it.
pub(crate) struct EventSink<T>(SinkInner<T>);

enum SinkInner<T> {
    Unbounded(mpsc::UnboundedSender<Arc<T>>),
    Latest(watch::Sender<Option<Arc<T>>>),
    Bounded(mpsc::Sender<Arc<T>>),
}

impl<T: Send + Sync + 'static> EventSink<T> {
    /// Hand one event to the subscriber. Never blocks.
    pub(crate) fn emit(&self, event: Arc<T>) {
        match &self.0 {
            SinkInner::Unbounded(tx) => {
                if tx.send(event).is_err() {
                    trace!("subscriber gone, event dropped");
                }
            }
            SinkInner::Latest(tx) => {
                // Replaces the held value whether or not it was seen.
                if tx.send(Some(event)).is_err() {
                    trace!("subscriber gone, event dropped");
                }
            }
            SinkInner::Bounded(tx) => match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!("subscriber buffer full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!("subscriber gone, event dropped");
                }
            },
        }
    }
}

/// Stream half handed to the subscriber.
///
/// Ends once the sink is dropped and any buffered events have drained.
pub(crate) struct SinkSource<T>(SourceInner<T>);

enum SourceInner<T> {
    Unbounded(UnboundedReceiverStream<Arc<T>>),
    Latest(WatchStream<Option<Arc<T>>>),
    Bounded(ReceiverStream<Arc<T>>),
}

impl<T: Send + Sync + 'static> Stream for SinkSource<T> {
    type Item = Arc<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().0 {
            SourceInner::Unbounded(rx) => Pin::new(rx).poll_next(cx),
            SourceInner::Bounded(rx) => Pin::new(rx).poll_next(cx),
            SourceInner::Latest(rx) => loop {
                match Pin::new(&mut *rx).poll_next(cx) {
                    Poll::Ready(Some(Some(event))) => return Poll::Ready(Some(event)),
                    // The watch channel's seed value, not an event.
                    Poll::Ready(Some(None)) => continue,
                    Poll::Ready(None) => return Poll::Ready(None),
                    Poll::Pending => return Poll::Pending,
                }
            },
        }
    }
}
