//! Error types for streambus.

use thiserror::Error;

/// Errors from binding a listener to a subscription.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The sink handed to a listener class was built for a different event
    /// type. The bridge pairs the two itself; this arises only when a
    /// class and a sink are paired by hand.
    #[error("sink does not match listener class for event type {expected}")]
    SinkMismatch {
        /// Name of the event type the class was synthesized for.
        expected: &'static str,
    },
}

/// Result type alias for subscription operations.
pub type Result<T> = std::result::Result<T, ListenerError>;
