//! One transmission raced against its deadline.

use std::time::Duration;

use herald_common::internal;
use thiserror::Error;

use crate::{
    error::ErrorKind,
    message::Message,
    transport::{Receipt, TransportHandle},
};

/// A classified failure of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {error}")]
pub struct AttemptFailure {
    pub kind: ErrorKind,
    pub error: String,
}

impl AttemptFailure {
    #[must_use]
    pub fn new(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            error: error.into(),
        }
    }
}

/// Transmit `message` once, giving up after `deadline`.
///
/// A transport error is classified with [`ErrorKind::classify`]. An elapsed
/// deadline is reported as [`ErrorKind::Timeout`]; the transport future is
/// dropped at that point.
///
/// # Errors
///
/// Returns an [`AttemptFailure`] when the deadline elapses or the transport
/// reports an error.
pub async fn attempt(
    handle: &TransportHandle,
    message: &Message,
    deadline: Duration,
) -> Result<Receipt, AttemptFailure> {
    match tokio::time::timeout(deadline, handle.transmit(message)).await {
        Ok(Ok(receipt)) => {
            if !receipt.rejected.is_empty() {
                internal!(
                    level = WARN,
                    rejected = ?receipt.rejected,
                    "Provider accepted the message but rejected some recipients"
                );
            }
            Ok(receipt)
        }
        Ok(Err(error)) => {
            let kind = ErrorKind::classify(&error);
            internal!(level = DEBUG, %kind, %error, "Attempt failed");
            Err(AttemptFailure::new(kind, error.to_string()))
        }
        Err(_) => Err(AttemptFailure::new(
            ErrorKind::Timeout,
            format!("no response within {}ms", deadline.as_millis()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{error::TransportError, transport::Transport};

    #[derive(Debug)]
    enum Behaviour {
        Accept,
        PartiallyAccept,
        Refuse(u16),
        Hang,
    }

    #[derive(Debug)]
    struct Fixed(Behaviour);

    #[async_trait]
    impl Transport for Fixed {
        async fn transmit(&self, _message: &Message) -> Result<Receipt, TransportError> {
            match self.0 {
                Behaviour::Accept => Ok(Receipt::new("<id@example.com>")),
                Behaviour::PartiallyAccept => Ok(Receipt {
                    message_id: "<id@example.com>".to_string(),
                    rejected: vec!["gone@example.com".to_string()],
                }),
                Behaviour::Refuse(code) => Err(TransportError::Smtp {
                    code,
                    message: "no".to_string(),
                }),
                Behaviour::Hang => std::future::pending().await,
            }
        }
    }

    fn message() -> Message {
        Message::new("user@example.com", "Hi", "<p>Hi</p>")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success() {
        let handle: TransportHandle = Arc::new(Fixed(Behaviour::Accept));
        let receipt = attempt(&handle, &message(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(receipt.message_id, "<id@example.com>");
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_rejection_still_succeeds() {
        let handle: TransportHandle = Arc::new(Fixed(Behaviour::PartiallyAccept));
        let receipt = attempt(&handle, &message(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(receipt.rejected, vec!["gone@example.com".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let handle: TransportHandle = Arc::new(Fixed(Behaviour::Hang));
        let start = tokio::time::Instant::now();

        let failure = attempt(&handle, &message(), Duration::from_secs(90))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::Timeout);
        assert_eq!(start.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_classified() {
        let handle: TransportHandle = Arc::new(Fixed(Behaviour::Refuse(550)));
        let failure = attempt(&handle, &message(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Rejection);

        let handle: TransportHandle = Arc::new(Fixed(Behaviour::Refuse(421)));
        let failure = attempt(&handle, &message(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::ConnectionFailure);
        assert!(failure.to_string().starts_with("ConnectionFailure: "));
    }
}
