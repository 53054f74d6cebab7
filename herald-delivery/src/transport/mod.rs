//! The outbound channel seam.
//!
//! Delivery only ever talks to a [`Transport`] trait object. The concrete
//! channel is built once by a [`TransportBuilder`] and cached by the
//! [`TransportManager`].

mod manager;
pub mod smtp;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use manager::TransportManager;

use crate::{
    error::{ConfigurationError, TransportError},
    message::Message,
};

/// What the provider told us about an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Identifier the provider (or we, on its behalf) assigned to the message.
    pub message_id: String,
    /// Recipients the provider refused while still accepting the message.
    ///
    /// Always empty for [`smtp::SmtpTransport`]: each session carries a single
    /// recipient, so a refused RCPT fails the whole transmission instead.
    #[serde(default)]
    pub rejected: Vec<String>,
}

impl Receipt {
    #[must_use]
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            rejected: Vec::new(),
        }
    }
}

/// A channel able to transmit one message at a time.
///
/// Implementations must be safe to share across concurrent senders.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Transmit `message` once. No retries happen at this level.
    async fn transmit(&self, message: &Message) -> Result<Receipt, TransportError>;
}

/// Shared handle to the process-wide transport.
pub type TransportHandle = Arc<dyn Transport>;

/// Validates credentials and constructs the transport.
pub trait TransportBuilder: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when credentials are missing or malformed.
    fn build(&self) -> Result<TransportHandle, ConfigurationError>;
}

impl<F> TransportBuilder for F
where
    F: Fn() -> Result<TransportHandle, ConfigurationError> + Send + Sync,
{
    fn build(&self) -> Result<TransportHandle, ConfigurationError> {
        self()
    }
}
