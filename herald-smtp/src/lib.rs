//! Async SMTP submission client.
//!
//! Only the client half of the protocol lives here: connecting (plain,
//! implicit TLS or STARTTLS), authenticating with `AUTH PLAIN`, and running
//! a single `MAIL`/`RCPT`/`DATA` transaction.

pub mod client;

pub use client::{ClientError, Response, Security, SmtpClient};
