//! Bounded-retry delivery of a single message.

use std::sync::Arc;

use herald_common::{audit, internal};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    attempt::{AttemptFailure, attempt},
    error::ErrorKind,
    message::Message,
    outcome::DeliveryOutcome,
    policy::RetryPolicy,
    transport::{TransportHandle, TransportManager},
};

/// Sends one message with up to `max_attempts` attempts.
///
/// Attempts never overlap. Retryable failures (`Timeout`,
/// `ConnectionFailure`) back off for `attempt * backoff_step_ms` before the
/// next attempt; fatal ones (`Configuration`, `Rejection`) end the sequence
/// at once. Errors never escape: every call ends in a [`DeliveryOutcome`].
///
/// Cancelling the token stops waiting on an in-flight attempt, interrupts a
/// backoff and prevents further attempts. The in-flight transmission itself is
/// detached rather than killed: it runs on until it completes or hits its
/// deadline, but the caller gets its `Aborted` outcome at once.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    manager: Arc<TransportManager>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Dispatcher {
    #[must_use]
    pub fn new(manager: Arc<TransportManager>, policy: RetryPolicy) -> Self {
        Self {
            manager,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop retrying once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn manager(&self) -> &Arc<TransportManager> {
        &self.manager
    }

    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deliver `message` using the policy's `max_attempts`.
    pub async fn send(&self, message: &Message) -> DeliveryOutcome {
        self.send_with_attempts(message, self.policy.max_attempts)
            .await
    }

    /// Deliver `message` with at most `max_attempts` attempts.
    ///
    /// A value of zero is treated as one.
    pub async fn send_with_attempts(&self, message: &Message, max_attempts: u32) -> DeliveryOutcome {
        let started = Instant::now();

        let handle = match self.manager.acquire() {
            Ok(handle) => handle,
            Err(error) => {
                let outcome = DeliveryOutcome::Failed {
                    attempts: 0,
                    last_error: error.to_string(),
                    error_kind: ErrorKind::Configuration,
                };
                return conclude(message, outcome, started);
            }
        };

        let policy = self.policy.with_max_attempts(max_attempts.max(1));
        let outcome = self.run(&handle, message, &policy).await;
        conclude(message, outcome, started)
    }

    async fn run(
        &self,
        handle: &TransportHandle,
        message: &Message,
        policy: &RetryPolicy,
    ) -> DeliveryOutcome {
        let mut current = 1;

        loop {
            if self.cancel.is_cancelled() {
                return DeliveryOutcome::aborted(
                    current - 1,
                    format!("Cancelled before attempt {current}"),
                );
            }

            let deadline = policy.attempt_deadline(current);
            audit::log_delivery_attempt(message.recipient(), current, deadline.as_millis());

            let in_flight = tokio::spawn({
                let handle = Arc::clone(handle);
                let message = message.clone();
                async move { attempt(&handle, &message, deadline).await }
            });

            let result = tokio::select! {
                biased;
                joined = in_flight => match joined {
                    Ok(result) => result,
                    Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
                    Err(error) => {
                        return DeliveryOutcome::aborted(
                            current,
                            format!("Attempt {current} did not finish: {error}"),
                        );
                    }
                },
                () = self.cancel.cancelled() => {
                    internal!(
                        level = WARN,
                        attempt = current,
                        "Cancelled with an attempt in flight, detaching it"
                    );
                    return DeliveryOutcome::aborted(
                        current,
                        format!("Cancelled while attempt {current} was in flight"),
                    );
                }
            };

            let AttemptFailure { kind, error } = match result {
                Ok(receipt) => {
                    return DeliveryOutcome::Sent {
                        attempts: current,
                        provider_message_id: receipt.message_id,
                        rejected: receipt.rejected,
                    };
                }
                Err(failure) => failure,
            };

            if kind.is_fatal() {
                return DeliveryOutcome::Failed {
                    attempts: current,
                    last_error: error,
                    error_kind: kind,
                };
            }

            if !policy.should_retry(current) {
                return DeliveryOutcome::Failed {
                    attempts: current,
                    last_error: error,
                    error_kind: ErrorKind::RetryExhausted,
                };
            }

            if self.cancel.is_cancelled() {
                return DeliveryOutcome::aborted(
                    current,
                    format!("Cancelled after attempt {current} failed with {kind}: {error}"),
                );
            }

            let delay = policy.backoff(current);
            internal!(
                level = INFO,
                attempt = current,
                %kind,
                %error,
                retry_delay_ms = delay.as_millis(),
                "Attempt failed, backing off"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => {
                    return DeliveryOutcome::aborted(
                        current,
                        format!("Cancelled during backoff after {kind}: {error}"),
                    );
                }
            }

            current += 1;
        }
    }
}

fn conclude(message: &Message, outcome: DeliveryOutcome, started: Instant) -> DeliveryOutcome {
    let duration_ms = started.elapsed().as_millis();

    match &outcome {
        DeliveryOutcome::Sent {
            attempts,
            provider_message_id,
            ..
        } => audit::log_delivery_success(
            message.recipient(),
            *attempts,
            provider_message_id,
            duration_ms,
        ),
        DeliveryOutcome::Failed {
            attempts,
            last_error,
            error_kind,
        } => audit::log_delivery_failure(
            message.recipient(),
            *attempts,
            &error_kind.to_string(),
            last_error,
        ),
    }

    outcome
}
