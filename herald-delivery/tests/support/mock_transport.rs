//! Scripted in-memory transport.
//!
//! Each recipient gets a queue of [`Step`]s consumed one per transmit; once
//! the queue is empty the default step applies. Every call is recorded with
//! the (possibly paused) tokio clock so tests can check deadlines and
//! backoff exactly.
//!
//! ```rust,ignore
//! let mock = MockTransport::new()
//!     .script("a@example.com", [Step::Hang, Step::Accept]);
//! ```

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use herald_delivery::{Message, Receipt, Transport, TransportError};
use parking_lot::Mutex;
use tokio::time::Instant;

/// What the transport does for one call.
#[derive(Debug, Clone)]
pub enum Step {
    Accept,
    /// Accept, but report the listed recipients as refused.
    AcceptRejecting(Vec<String>),
    /// Accept after holding the connection for a while.
    AcceptAfter(Duration),
    /// Never answer.
    Hang,
    /// Connection refused.
    Refuse,
    /// Provider reply with the given code.
    Reply(u16),
    /// Malformed recipient address.
    BadAddress,
    /// Credentials refused.
    BadCredentials,
    /// Panic inside the transport.
    Panic,
}

/// One recorded transmit.
#[derive(Debug, Clone)]
pub struct Call {
    pub message: Message,
    pub at: Duration,
}

#[derive(Debug)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    default: Step,
    calls: Mutex<Vec<Call>>,
    started: Instant,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    sent: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: Step::Accept,
            calls: Mutex::new(Vec::new()),
            started: Instant::now(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            sent: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn script(self, recipient: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .insert(recipient.to_string(), steps.into_iter().collect());
        self
    }

    #[must_use]
    pub fn with_default(mut self, step: Step) -> Self {
        self.default = step;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Offsets from construction at which `recipient` was attempted.
    pub fn attempt_times(&self, recipient: &str) -> Vec<Duration> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.message.recipient() == recipient)
            .map(|call| call.at)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Transmits that ended in a receipt.
    pub fn delivered(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Highest number of transmits that overlapped.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_step(&self, recipient: &str) -> Step {
        self.scripts
            .lock()
            .get_mut(recipient)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn transmit(&self, message: &Message) -> Result<Receipt, TransportError> {
        self.calls.lock().push(Call {
            message: message.clone(),
            at: self.started.elapsed(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let mut rejected = Vec::new();
        match self.next_step(message.recipient()) {
            Step::Accept => {}
            Step::AcceptRejecting(refused) => rejected = refused,
            Step::AcceptAfter(delay) => tokio::time::sleep(delay).await,
            Step::Hang => {
                return std::future::pending::<Result<Receipt, TransportError>>().await;
            }
            Step::Refuse => {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            Step::Reply(code) => {
                return Err(TransportError::Smtp {
                    code,
                    message: format!("scripted reply {code}"),
                });
            }
            Step::BadAddress => {
                return Err(TransportError::Envelope(format!(
                    "'{}' is not an email address",
                    message.recipient()
                )));
            }
            Step::BadCredentials => {
                return Err(TransportError::Authentication(
                    "535 5.7.8 Username and Password not accepted".to_string(),
                ));
            }
            Step::Panic => panic!("scripted transport panic"),
        }

        let id = self.sent.fetch_add(1, Ordering::SeqCst);
        let mut receipt = Receipt::new(format!("<{id}@mock.test>"));
        receipt.rejected = rejected;
        Ok(receipt)
    }
}
