//! Error types for the gateway server.

use huddle_store::StoreError;

/// Failure of a single handler invocation.
///
/// Reported to the offending session as one `"error"` message; never fatal
/// to the session.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The inbound `data` did not decode into what the handler expects.
    #[error("invalid data for {name}: {reason}")]
    InvalidParams {
        /// Message name being handled.
        name: &'static str,
        /// Decode failure detail.
        reason: String,
    },

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    /// Build an [`HandlerError::InvalidParams`].
    pub fn invalid(name: &'static str, reason: impl ToString) -> Self {
        Self::InvalidParams {
            name,
            reason: reason.to_string(),
        }
    }
}

/// Failure reading from or writing to a client connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The other side is gone.
    #[error("connection closed")]
    Closed,

    /// The underlying socket reported an error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// A frame arrived that cannot carry a text envelope. The connection
    /// itself is still usable.
    #[error("undecodable frame: {0}")]
    InvalidFrame(String),
}

/// Failure establishing a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Creating the session's user record failed.
    #[error("failed to register session user: {0}")]
    Store(#[from] StoreError),
}
