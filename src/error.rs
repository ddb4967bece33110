use thiserror::Error;

use crate::ViolationKind;

/// Errors produced by connections, transports and serializers.
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying pub/sub transport failed to publish, subscribe or unsubscribe.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Inbound payload was not valid UTF-8 text.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A transport call did not finish within its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Pending request was cancelled because its connection closed.
    #[error("request cancelled: connection closed")]
    Cancelled,

    /// Operation attempted on a closed connection or transport.
    #[error("connection closed")]
    Closed,

    /// A required builder setting is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Builder settings contradict each other.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// An `Outcome` would have held both a value and violations, or neither.
    #[error("invalid outcome: {0}")]
    InvalidOutcome(String),

    /// A violation raised by its handler while an `Outcome` was resolved.
    #[error("{kind:?} violation: {message}")]
    Violation { kind: ViolationKind, message: String },

    /// No violation handler matched and the registry is configured to fail.
    #[error("no violation handler registered for {0:?}")]
    UnresolvedViolation(ViolationKind),
}

/// Result type alias for connection operations
pub type Result<T> = std::result::Result<T, Error>;
