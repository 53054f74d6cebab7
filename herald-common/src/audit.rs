//! Audit events for the notification lifecycle
//!
//! Every event is a structured `tracing` event carrying an `event` field so
//! it can be routed separately from operational logs.
//!
//! ## Audit Events
//!
//! - `DeliveryAttempt`: one transmission is about to start
//! - `DeliverySuccess`: the transport accepted the message
//! - `DeliveryFailure`: the message reached a terminal failure
//! - `BatchCompleted`: a fan-out finished and its report was assembled
//!
//! Recipient addresses can be redacted through [`AuditConfig`]. Transport
//! secrets are never passed to this module.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Which audit events are emitted and how recipients appear in them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Emit audit events at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replace the local part of recipient addresses with `[REDACTED]`
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Initialize audit logging with configuration.
///
/// The first call wins.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Active audit settings, or the defaults before [`init`] runs
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact an email address, keeping its domain
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if !redact {
        return email.to_string();
    }

    email
        .split_once('@')
        .map_or_else(|| "[REDACTED]".to_string(), |(_, domain)| {
            format!("[REDACTED]@{domain}")
        })
}

/// Log a delivery attempt
///
/// # Fields
/// - `recipient`: recipient address (redacted if configured)
/// - `delivery_attempt`: attempt number (1-based)
/// - `deadline_ms`: the deadline this attempt races against
pub fn log_delivery_attempt(recipient: &str, attempt: u32, deadline_ms: u128) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "herald::audit",
        tracing::Level::INFO,
        event = "DeliveryAttempt",
        recipient = %redact_email(recipient, config.redact_recipients),
        delivery_attempt = attempt,
        deadline_ms = deadline_ms,
        "Audit: Delivery attempt"
    );
}

/// Log a successful delivery
pub fn log_delivery_success(
    recipient: &str,
    attempts: u32,
    provider_message_id: &str,
    duration_ms: u128,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "herald::audit",
        tracing::Level::INFO,
        event = "DeliverySuccess",
        recipient = %redact_email(recipient, config.redact_recipients),
        delivery_attempt = attempts,
        provider_message_id = %provider_message_id,
        duration_ms = duration_ms,
        "Audit: Delivery successful"
    );
}

/// Log a terminal delivery failure
///
/// `kind` is the display form of the failure classification.
pub fn log_delivery_failure(recipient: &str, attempts: u32, kind: &str, error: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "herald::audit",
        tracing::Level::WARN,
        event = "DeliveryFailure",
        recipient = %redact_email(recipient, config.redact_recipients),
        delivery_attempt = attempts,
        kind = %kind,
        error = %error,
        "Audit: Delivery failed"
    );
}

/// Log the completion of a batch
pub fn log_batch_completed(total: usize, succeeded: usize, failed: usize, duration_ms: u128) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "herald::audit",
        tracing::Level::INFO,
        event = "BatchCompleted",
        total = total,
        succeeded = succeeded,
        failed = failed,
        duration_ms = duration_ms,
        "Audit: Batch completed"
    );
}
