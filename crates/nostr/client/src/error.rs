//! Client error types.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("relay error: {0}")]
    RelayError(String),

    #[error("timeout error: {0}")]
    Timeout(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("no signer available for authentication")]
    NoSigner,

    #[error("relay rejected authentication: {0}")]
    AuthRejected(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("could not resolve following list: {0}")]
    Resolution(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Failures of the underlying connection rather than of the request.
    /// The pool reopens the relay on the next request after one of these.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::Connection(_) | Self::Protocol(_) | Self::NotConnected
        )
    }

    /// Whether the request was aborted by its deadline or by the caller.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled)
    }
}

impl From<nostr::Nip01Error> for ClientError {
    fn from(error: nostr::Nip01Error) -> Self {
        Self::Signing(error.to_string())
    }
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;
