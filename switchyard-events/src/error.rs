// Error types for the event bus

use thiserror::Error;
use uuid::Uuid;

/// Grammar violation in a topic or pattern.
///
/// Raised synchronously by `register`, `add_middleware` and `emit`; never
/// recorded on an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Topic or pattern must not be empty")]
    Empty,

    #[error("Empty segment at position {position} in `{input}`")]
    EmptySegment { input: String, position: usize },

    #[error("Invalid segment `{segment}` in `{input}`")]
    InvalidSegment { input: String, segment: String },

    #[error("Topic `{topic}` contains wildcard markers")]
    WildcardInTopic { topic: String },

    #[error("Failed to compile pattern `{pattern}`: {reason}")]
    Compile { pattern: String, reason: String },
}

/// Event bus errors
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("Timed listener destruction requires a running Tokio runtime")]
    NoRuntime,
}

/// Failure returned by a listener or middleware callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Event processing error: {0}")]
    ProcessingError(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::HandlerFailed`].
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::HandlerFailed(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        HandlerError::Panicked(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::HandlerFailed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::HandlerFailed(message.to_string())
    }
}

/// A failure record accumulated on [`Event::errors`](crate::Event::errors).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Listener on `{pattern}` failed: {source}")]
    Listener {
        pattern: String,
        listener_id: Uuid,
        source: HandlerError,
    },

    #[error("Middleware on `{pattern}` failed: {source}")]
    Middleware {
        pattern: String,
        source: HandlerError,
    },

    #[error("Listener on `{pattern}` timed out after {timeout_ms}ms handling `{topic}`")]
    Timeout {
        topic: String,
        pattern: String,
        timeout_ms: u64,
    },

    #[error("{0}")]
    Reported(HandlerError),
}

impl EventError {
    /// Whether this record was produced by the per-listener timeout race.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EventError::Timeout { .. })
    }
}

impl From<HandlerError> for EventError {
    fn from(err: HandlerError) -> Self {
        EventError::Reported(err)
    }
}

pub type Result<T> = std::result::Result<T, EventBusError>;
