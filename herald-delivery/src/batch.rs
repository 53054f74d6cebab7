//! Fan-out of one template to many recipients.

use std::{collections::BTreeMap, sync::Arc};

use herald_common::{audit, internal, tracing};
use serde::{Deserialize, Serialize};
use tokio::{task::JoinSet, time::Instant};

use crate::{
    dispatcher::Dispatcher,
    error::BatchError,
    message::{MessageTemplate, Recipient},
    outcome::{BatchEntry, BatchReport, DeliveryOutcome},
};

/// Fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of recipients in flight at once.
    ///
    /// Default: 8
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,

    /// Tokens applied to every recipient. A recipient's own tokens win.
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::concurrency(),
            tokens: BTreeMap::new(),
        }
    }
}

mod defaults {
    pub const fn concurrency() -> usize {
        8
    }
}

/// Sends a personalised copy of a template to each recipient through a
/// bounded pool of workers.
///
/// Every recipient runs its own [`Dispatcher::send`]. A failing or panicking
/// worker only affects its own entry in the report.
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    dispatcher: Arc<Dispatcher>,
    config: BatchConfig,
}

impl BatchDispatcher {
    #[must_use]
    pub const fn new(dispatcher: Arc<Dispatcher>, config: BatchConfig) -> Self {
        Self { dispatcher, config }
    }

    #[must_use]
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Deliver `template` to every recipient.
    ///
    /// The report lists recipients in input order. Recipients never
    /// scheduled because the dispatcher was cancelled, and recipients whose
    /// worker panicked, are reported as failed with
    /// [`ErrorKind::Aborted`](crate::ErrorKind::Aborted).
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Configuration`] if the transport cannot be
    /// acquired. No worker is started in that case.
    pub async fn send_many(
        &self,
        template: &MessageTemplate,
        recipients: &[Recipient],
    ) -> Result<BatchReport, BatchError> {
        if recipients.is_empty() {
            return Ok(BatchReport::default());
        }

        self.dispatcher.manager().acquire()?;

        let started = Instant::now();
        let concurrency = self.config.concurrency.max(1);
        let cancel = self.dispatcher.cancellation().clone();

        internal!(
            level = INFO,
            recipients = recipients.len(),
            concurrency,
            "Dispatching batch"
        );

        let mut outcomes: Vec<Option<DeliveryOutcome>> = vec![None; recipients.len()];
        let mut scheduled = 0;
        let mut workers = JoinSet::new();

        let mut spawn_next = |workers: &mut JoinSet<(usize, DeliveryOutcome)>| {
            if scheduled >= recipients.len() || cancel.is_cancelled() {
                return;
            }

            let index = scheduled;
            scheduled += 1;

            let message = template.personalize(&self.merged(&recipients[index]));
            let dispatcher = Arc::clone(&self.dispatcher);
            workers.spawn(async move { (index, dispatcher.send(&message).await) });
        };

        for _ in 0..concurrency.min(recipients.len()) {
            spawn_next(&mut workers);
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(error) => tracing::error!(%error, "Batch worker failed"),
            }
            spawn_next(&mut workers);
        }

        let entries = recipients
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (recipient, outcome))| BatchEntry {
                recipient: recipient.address.clone(),
                outcome: outcome.unwrap_or_else(|| {
                    if index < scheduled {
                        DeliveryOutcome::aborted(0, "Worker terminated before reporting")
                    } else {
                        DeliveryOutcome::aborted(0, "Cancelled before dispatch")
                    }
                }),
            })
            .collect();

        let report = BatchReport::from_entries(entries);
        audit::log_batch_completed(
            report.total,
            report.succeeded,
            report.failed,
            started.elapsed().as_millis(),
        );

        Ok(report)
    }

    fn merged(&self, recipient: &Recipient) -> Recipient {
        if self.config.tokens.is_empty() {
            return recipient.clone();
        }

        let mut tokens = self.config.tokens.clone();
        tokens.extend(recipient.tokens.clone());
        Recipient {
            address: recipient.address.clone(),
            tokens,
        }
    }
}
