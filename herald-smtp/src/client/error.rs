use std::io;

use thiserror::Error;

/// Failure of a submission session.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    /// The reply could not be parsed as `<code>[ -]<text>`.
    #[error("Malformed reply: {0}")]
    ParseError(String),

    /// A 4xx or 5xx reply.
    #[error("Server replied {code}: {message}")]
    SmtpError { code: u16, message: String },

    /// A reply class the command does not allow, e.g. 3xx to `MAIL`.
    #[error("Unexpected reply {code}: {message}")]
    UnexpectedResponse { code: u16, message: String },

    /// `AUTH` was refused.
    #[error("Credentials refused with {code}: {message}")]
    AuthenticationFailed { code: u16, message: String },

    #[error("TLS handshake failed: {0}")]
    TlsError(String),

    /// The server hung up mid-session.
    #[error("Server closed the connection")]
    ConnectionClosed,

    #[error("Reply is not valid UTF-8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
