//! SMTP client implementation.
//!
//! # Example
//!
//! ```no_run
//! use herald_smtp::{Security, SmtpClient};
//!
//! # async fn example() -> Result<(), herald_smtp::ClientError> {
//! let mut client = SmtpClient::connect("smtp.example.com:465", "smtp.example.com", Security::Implicit).await?;
//! client.read_greeting().await?;
//! client.ehlo("client.example.com").await?;
//! client.auth_plain("user@example.com", "secret").await?;
//! client.mail_from("user@example.com").await?;
//! client.rcpt_to("rcpt@example.org").await?;
//! client.data().await?;
//! client.send_data("Subject: Hi\r\n\r\nHello\r\n").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::{Security, SmtpClient, dot_stuff};
