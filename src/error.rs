//! Error types for the producer stage.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the producer stage and its transports.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The telemetry channel could not be connected during `init`
    #[error("Telemetry connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// No work source was configured on the stage
    #[error("No work source configured for stage '{stage}'")]
    MissingWorkSource { stage: String },

    /// The work source reported failure from its own `init`
    #[error("Work source of stage '{stage}' failed to initialize")]
    WorkSourceInit { stage: String },

    /// The work source did not hand out a lazy sequence from `run`
    #[error("Work source of stage '{stage}' did not return a sequence")]
    MalformedSequence { stage: String },

    /// A destination label has no channel in the router
    #[error("No route for destination '{label}'")]
    Routing { label: String },

    /// The downstream transport failed or never replied
    #[error("Send failed: {0}")]
    Send(Arc<dyn std::error::Error + Send + Sync>),

    /// A request/reply exchange exceeded the configured send timeout
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A channel was closed unexpectedly
    #[error("Channel was closed unexpectedly")]
    ChannelClosed,

    /// `start` was called before a successful `init`
    #[error("Stage '{stage}' was not initialized")]
    NotInitialized { stage: String },

    /// `init` was called twice
    #[error("Stage '{stage}' is already initialized")]
    AlreadyInitialized { stage: String },

    /// `join` was called before `start`
    #[error("Stage '{stage}' was not started")]
    NotStarted { stage: String },

    /// `start` was called twice
    #[error("Stage '{stage}' was already started")]
    AlreadyStarted { stage: String },

    /// The stage thread could not be spawned
    #[error("Failed to spawn stage thread: {0}")]
    Spawn(Arc<std::io::Error>),

    /// A telemetry message could not be encoded or decoded
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// The stage thread panicked
    #[error("Stage '{stage}' panicked")]
    StagePanicked { stage: String },

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a send error from any error type
    pub fn send<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Send(Arc::new(error))
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a timeout error for an elapsed limit, saturating at `u64::MAX` milliseconds
    pub fn timeout_after(limit: Duration) -> Self {
        Error::timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Whether this error was raised by the streaming loop for a single item
    pub fn is_item_failure(&self) -> bool {
        matches!(
            self,
            Error::Routing { .. } | Error::Send(_) | Error::Timeout { .. } | Error::ChannelClosed
        )
    }
}

// Common conversions
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::ChannelClosed
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Telemetry(e.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting transport errors into our Error type
pub trait IntoSendError<T> {
    fn into_send_error(self) -> Result<T>;
}

impl<T, E> IntoSendError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_send_error(self) -> Result<T> {
        self.map_err(Error::send)
    }
}
