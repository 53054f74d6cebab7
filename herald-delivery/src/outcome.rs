//! Terminal results handed back to the caller.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Result of one message's attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum DeliveryOutcome {
    Sent {
        attempts: u32,
        provider_message_id: String,
        /// Recipients the provider refused while accepting the message.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rejected: Vec<String>,
    },
    Failed {
        /// Attempts that reached the transport. Zero when none could start.
        attempts: u32,
        last_error: String,
        error_kind: ErrorKind,
    },
}

impl DeliveryOutcome {
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Sent { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    /// `None` for a sent message.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Sent { .. } => None,
            Self::Failed { error_kind, .. } => Some(*error_kind),
        }
    }

    pub(crate) fn aborted(attempts: u32, reason: impl Into<String>) -> Self {
        Self::Failed {
            attempts,
            last_error: reason.into(),
            error_kind: ErrorKind::Aborted,
        }
    }
}

/// One row of a [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub recipient: String,
    pub outcome: DeliveryOutcome,
}

/// Aggregate result of a fan-out, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    /// Tally `entries`, keeping their order.
    #[must_use]
    pub fn from_entries(entries: Vec<BatchEntry>) -> Self {
        let succeeded = entries.iter().filter(|e| e.outcome.is_sent()).count();

        Self {
            total: entries.len(),
            succeeded,
            failed: entries.len() - succeeded,
            entries,
        }
    }

    /// Entries that did not end in [`DeliveryOutcome::Sent`].
    pub fn failures(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| !e.outcome.is_sent())
    }

    #[must_use]
    pub const fn all_sent(&self) -> bool {
        self.failed == 0
    }
}
