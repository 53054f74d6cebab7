//! Reliable notification delivery.
//!
//! The crate is built leaves first:
//!
//! - [`TransportManager`] lazily builds and caches the single outbound
//!   [`Transport`] handle, validating credentials on construction.
//! - [`attempt`] transmits once, racing the transport against a deadline,
//!   and classifies any failure into an [`ErrorKind`].
//! - [`Dispatcher`] runs the bounded attempt loop for one [`Message`] and
//!   always ends in a [`DeliveryOutcome`].
//! - [`BatchDispatcher`] fans a [`MessageTemplate`] out to many
//!   [`Recipient`]s through a bounded worker pool and returns an
//!   order-preserving [`BatchReport`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use herald_delivery::{
//!     Dispatcher, Message, RetryPolicy, TransportManager,
//!     smtp::{Secret, SecretFormat, SmtpConfig, SmtpTransportBuilder},
//! };
//!
//! # async fn example() {
//! let config = SmtpConfig {
//!     host: "smtp.example.com".to_string(),
//!     port: 465,
//!     username: "notify@example.com".to_string(),
//!     secret: Secret::new("abcd efgh ijkl mnop"),
//!     secret_format: SecretFormat::AppPassword,
//!     ..SmtpConfig::default()
//! };
//!
//! let manager = Arc::new(TransportManager::new(SmtpTransportBuilder::new(config)));
//! let dispatcher = Dispatcher::new(manager, RetryPolicy::default());
//!
//! let message = Message::new("user@example.org", "Your receipt", "<p>Thanks!</p>");
//! let outcome = dispatcher.send(&message).await;
//! println!("{outcome:?}");
//! # }
//! ```

pub mod attempt;
pub mod batch;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod outcome;
pub mod policy;
pub mod transport;

pub use attempt::{AttemptFailure, attempt};
pub use batch::{BatchConfig, BatchDispatcher};
pub use dispatcher::Dispatcher;
pub use error::{BatchError, ConfigurationError, ErrorKind, TransportError};
pub use message::{Message, MessageTemplate, Recipient};
pub use outcome::{BatchEntry, BatchReport, DeliveryOutcome};
pub use policy::RetryPolicy;
pub use transport::{
    Receipt, Transport, TransportBuilder, TransportHandle, TransportManager, smtp,
};
