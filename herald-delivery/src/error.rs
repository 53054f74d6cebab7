//! Typed errors and failure classification for delivery.
//!
//! Raw transport failures ([`TransportError`]) are never acted on directly.
//! They are mapped through [`ErrorKind::classify`], a pure function, and the
//! retry loop only ever looks at the resulting kind:
//! - `Timeout` / `ConnectionFailure` - retry with backoff
//! - `Configuration` / `Rejection` - stop immediately

use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed send.
///
/// The first four variants are produced by [`ErrorKind::classify`]. The last
/// two only ever appear on a terminal [`DeliveryOutcome`](crate::DeliveryOutcome).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The attempt deadline elapsed before the transport answered.
    Timeout,
    /// Network-level or transient provider failure.
    ConnectionFailure,
    /// Credentials are missing, malformed or refused.
    Configuration,
    /// The provider rejected the message or the recipient address.
    Rejection,
    /// Every attempt failed with a retryable error.
    RetryExhausted,
    /// The send never reached a transport verdict: the caller cancelled, or
    /// the worker running it died.
    Aborted,
}

impl ErrorKind {
    /// Map a raw transport error onto its kind.
    ///
    /// Pure: the same error always yields the same kind.
    #[must_use]
    pub fn classify(error: &TransportError) -> Self {
        match error {
            TransportError::Io(e) if e.kind() == io::ErrorKind::TimedOut => Self::Timeout,
            TransportError::Timeout(_) => Self::Timeout,
            TransportError::Io(_) | TransportError::Connection(_) | TransportError::Protocol(_) => {
                Self::ConnectionFailure
            }
            TransportError::Smtp { code, .. } if (500..600).contains(code) => Self::Rejection,
            TransportError::Smtp { .. } => Self::ConnectionFailure,
            TransportError::Authentication(_) => Self::Configuration,
            TransportError::Envelope(_) => Self::Rejection,
        }
    }

    /// Returns `true` if another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailure)
    }

    /// Returns `true` if retrying can never help.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Configuration | Self::Rejection)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "Timeout",
            Self::ConnectionFailure => "ConnectionFailure",
            Self::Configuration => "Configuration",
            Self::Rejection => "Rejection",
            Self::RetryExhausted => "RetryExhausted",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// A failure reported by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transport gave up waiting on the provider.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The connection could not be established or was lost.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The provider spoke something we could not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The provider answered with an error reply.
    #[error("Provider replied {code}: {message}")]
    Smtp { code: u16, message: String },

    /// The provider refused the credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A sender or recipient address is malformed or was refused.
    #[error("Envelope rejected: {0}")]
    Envelope(String),
}

/// Convert SMTP client errors into transport errors.
///
/// Reply codes are preserved so classification can tell 4xx from 5xx.
impl From<herald_smtp::ClientError> for TransportError {
    fn from(error: herald_smtp::ClientError) -> Self {
        use herald_smtp::ClientError;

        match error {
            ClientError::Io(e) => Self::Io(e),
            ClientError::ConnectionClosed => {
                Self::Connection("Connection closed unexpectedly".to_string())
            }
            ClientError::TlsError(msg) => Self::Connection(format!("TLS: {msg}")),
            ClientError::SmtpError { code, message } => Self::Smtp { code, message },
            ClientError::AuthenticationFailed { code, message } => {
                Self::Authentication(format!("{code} {message}"))
            }
            ClientError::UnexpectedResponse { code, message } => {
                Self::Protocol(format!("Unexpected reply {code} {message}"))
            }
            ClientError::ParseError(msg) => Self::Protocol(msg),
            ClientError::Utf8Error(e) => Self::Protocol(format!("UTF-8 decoding error: {e}")),
        }
    }
}

/// Credentials or transport settings are unusable. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A required credential or setting is absent or blank.
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// An app-password secret does not have the expected length.
    #[error("Malformed secret: expected {expected} characters after removing whitespace, got {actual}")]
    MalformedSecret { expected: usize, actual: usize },

    /// A setting is present but invalid.
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors that stop a batch before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("Transport unavailable: {0}")]
    Configuration(#[from] ConfigurationError),
}
