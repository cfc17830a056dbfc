//! Error types for the relay.

/// A failure reported by a backend collaborator (agent or knowledge index).
///
/// `cause` carries the category the backend signaled (for example
/// `internalServerException`); it is what [`crate::classify_failure`]
/// inspects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{cause}: {message}")]
pub struct BackendError {
    pub cause: String,
    pub message: String,
}

impl BackendError {
    pub fn new(cause: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            message: message.into(),
        }
    }

    /// A failure below the backend protocol: connect, TLS, body read.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new("transport", message)
    }
}

/// The agent could not be invoked.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The backend rejected the call in a way retrying cannot fix.
    #[error("agent invocation failed on attempt {attempts}: {source}")]
    Permanent {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// Every attempt in the retry budget hit a transient failure.
    #[error("agent invocation still failing after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: BackendError,
    },
}

impl InvocationError {
    /// Number of calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The failure reported by the last attempt.
    pub fn last_error(&self) -> &BackendError {
        match self {
            Self::Permanent { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }
}

/// An event could not be delivered to a client connection.
///
/// Never fatal to an invocation: the relay logs it and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The connection is unknown or has closed.
    #[error("connection {0} is gone")]
    ConnectionGone(String),

    /// The event could not be encoded for the wire.
    #[error("failed to encode outbound event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Reasons an invocation aborts.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The knowledge index lookup failed before the agent was called.
    #[error("retrieval failed: {0}")]
    Retrieval(#[source] BackendError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// The response stream broke after streaming had started. Events already
    /// pushed stay with the client.
    #[error("response stream failed: {0}")]
    Stream(#[source] BackendError),
}
