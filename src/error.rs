//! APNs client error taxonomy.

use thiserror::Error;

/// Result type for APNs operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the sender core and mock server.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or conflicting credentials, or an invalid pool capacity.
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS handshake failure, ALPN mismatch, or connection loss.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame write to the socket failed.
    #[error("write failure: {0}")]
    WriteFailure(String),

    /// The connection's stream id space is exhausted; it is being closed.
    #[error("stream id space exhausted on this connection")]
    StreamsExhausted,

    /// RST_STREAM received for a reason other than REFUSED_STREAM.
    #[error("stream reset by peer: {0:?}")]
    StreamReset(h2::Reason),

    /// The connection closed while a stream was still awaiting a reply.
    #[error("connection closed before a reply was received")]
    StreamClosedBeforeReply,

    /// APNs responded with :status 500.
    #[error("APNs server error (HTTP 500)")]
    ServerError,

    /// A domain-level rejection returned by APNs (or the mock server).
    #[error("notification rejected: {reason}")]
    Rejection {
        /// The rejection reason token.
        reason: crate::notification::RejectionReason,
        /// Present only for `Unregistered`: the token's invalidation time.
        timestamp: Option<i64>,
    },

    /// `send` was called after the client was closed.
    #[error("client is closed")]
    ClientClosed,

    /// `acquire` was called after the pool was closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The signing key could not be parsed or used to sign a JWT.
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for rejections specific to the notification rather than the
    /// transport.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejection { .. })
    }

    /// True for the subset of errors the connection handler retries
    /// internally on a fresh stream (REFUSED_STREAM, expired provider
    /// token); everything else is terminal for the notification.
    pub fn is_internally_retryable(&self) -> bool {
        matches!(self, Self::StreamReset(h2::Reason::REFUSED_STREAM))
            || matches!(
                self,
                Self::Rejection {
                    reason: crate::notification::RejectionReason::ExpiredProviderToken,
                    ..
                }
            )
    }
}

impl From<h2::Error> for Error {
    fn from(err: h2::Error) -> Self {
        if let Some(reason) = err.reason() {
            Self::StreamReset(reason)
        } else if err.is_io() {
            Self::Transport(err.to_string())
        } else {
            Self::WriteFailure(err.to_string())
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("malformed JSON: {err}"))
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Self::WriteFailure(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::WriteFailure(err.to_string())
    }
}
