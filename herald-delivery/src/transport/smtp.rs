//! SMTP submission transport.
//!
//! Each transmit opens a fresh session, sends a single message and quits.
//! Credentials are validated once, when the transport is built.

use std::{fmt, sync::Arc};

use herald_common::{internal, tracing};
use herald_smtp::{ClientError, Security, SmtpClient};
use serde::{Deserialize, Serialize};

use super::{Receipt, Transport, TransportBuilder, TransportHandle};
use crate::{
    error::{ConfigurationError, TransportError},
    message::{Message, is_plausible_address},
};

/// Length of an app password once whitespace is removed.
pub const APP_PASSWORD_LEN: usize = 16;

/// A credential that never shows up in logs or debug output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// How the configured secret should be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretFormat {
    /// Used verbatim.
    #[default]
    Plain,
    /// Provider-issued app password. Commonly displayed in groups of four, so
    /// whitespace is stripped and the remainder must be exactly
    /// [`APP_PASSWORD_LEN`] characters.
    AppPassword,
}

const fn default_port() -> u16 {
    465
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

/// Settings for the submission server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub security: Security,
    pub username: String,
    pub secret: Secret,
    #[serde(default)]
    pub secret_format: SecretFormat,
    /// Sender address. Defaults to `username`.
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default = "default_helo_name")]
    pub helo_name: String,
    /// Skip certificate validation. Test servers only.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl SmtpConfig {
    /// Check the credentials and produce the normalised settings the
    /// transport runs with.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when a required field is blank, the
    /// secret does not match its declared format, or the sender address is
    /// not usable.
    pub fn validate(&self) -> Result<ValidatedSmtp, ConfigurationError> {
        if self.host.trim().is_empty() {
            return Err(ConfigurationError::Missing("host"));
        }
        if self.port == 0 {
            return Err(ConfigurationError::Invalid {
                field: "port",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.username.trim().is_empty() {
            return Err(ConfigurationError::Missing("username"));
        }
        if self.secret.expose().trim().is_empty() {
            return Err(ConfigurationError::Missing("secret"));
        }

        let secret = match self.secret_format {
            SecretFormat::Plain => self.secret.clone(),
            SecretFormat::AppPassword => {
                let compact: String = self
                    .secret
                    .expose()
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                let actual = compact.chars().count();
                if actual != APP_PASSWORD_LEN {
                    return Err(ConfigurationError::MalformedSecret {
                        expected: APP_PASSWORD_LEN,
                        actual,
                    });
                }
                Secret(compact)
            }
        };

        let from = self
            .from
            .as_deref()
            .unwrap_or(&self.username)
            .trim()
            .to_string();
        if !is_plausible_address(&from) {
            return Err(ConfigurationError::Invalid {
                field: "from",
                reason: format!("'{from}' is not an email address"),
            });
        }

        Ok(ValidatedSmtp {
            address: format!("{}:{}", self.host.trim(), self.port),
            server_name: self.host.trim().to_string(),
            security: self.security,
            username: self.username.trim().to_string(),
            secret,
            from,
            helo_name: self.helo_name.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
        })
    }
}

/// Settings that passed [`SmtpConfig::validate`].
#[derive(Debug, Clone)]
pub struct ValidatedSmtp {
    address: String,
    server_name: String,
    security: Security,
    username: String,
    secret: Secret,
    from: String,
    helo_name: String,
    accept_invalid_certs: bool,
}

impl ValidatedSmtp {
    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    fn message_id(&self) -> String {
        let domain = self
            .from
            .rsplit_once('@')
            .map_or("localhost", |(_, domain)| domain);
        format!("<{}@{domain}>", ulid::Ulid::new())
    }
}

/// Builds an [`SmtpTransport`] from configuration.
#[derive(Debug, Clone)]
pub struct SmtpTransportBuilder {
    config: SmtpConfig,
}

impl SmtpTransportBuilder {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

impl TransportBuilder for SmtpTransportBuilder {
    fn build(&self) -> Result<TransportHandle, ConfigurationError> {
        let settings = self.config.validate()?;
        internal!(
            level = INFO,
            server = %settings.address,
            security = ?settings.security,
            "SMTP transport configured"
        );
        Ok(Arc::new(SmtpTransport { settings }))
    }
}

/// Sends each message over its own SMTP session.
#[derive(Debug)]
pub struct SmtpTransport {
    settings: ValidatedSmtp,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(settings: ValidatedSmtp) -> Self {
        Self { settings }
    }

    async fn session(
        &self,
        client: &mut SmtpClient,
        message: &Message,
        message_id: &str,
    ) -> Result<(), TransportError> {
        let settings = &self.settings;

        client.read_greeting().await?;
        client.ehlo(&settings.helo_name).await?;

        if settings.security == Security::StartTls {
            client.starttls().await?;
            client.ehlo(&settings.helo_name).await?;
        }

        client
            .auth_plain(&settings.username, settings.secret.expose())
            .await?;
        client.mail_from(&settings.from).await?;

        client
            .rcpt_to(message.recipient())
            .await
            .map_err(|error| match error {
                ClientError::SmtpError { code, message: reply } if (500..600).contains(&code) => {
                    TransportError::Envelope(format!(
                        "{} refused with {code} {reply}",
                        message.recipient()
                    ))
                }
                other => other.into(),
            })?;

        client.data().await?;
        client
            .send_data(&message.to_mime(&settings.from, message_id))
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for SmtpTransport {
    async fn transmit(&self, message: &Message) -> Result<Receipt, TransportError> {
        if !is_plausible_address(message.recipient()) {
            return Err(TransportError::Envelope(format!(
                "'{}' is not an email address",
                message.recipient()
            )));
        }

        let settings = &self.settings;
        let mut client = SmtpClient::connect_with(
            &settings.address,
            &settings.server_name,
            settings.security,
            settings.accept_invalid_certs,
        )
        .await?;

        let message_id = settings.message_id();
        let result = self.session(&mut client, message, &message_id).await;

        if let Err(error) = client.quit().await {
            tracing::debug!(%error, "QUIT failed after transaction");
        }

        result.map(|()| Receipt::new(message_id))
    }
}
