use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use herald_common::{audit, internal, logging};
use herald_delivery::{
    BatchConfig, BatchDispatcher, BatchError, BatchReport, DeliveryOutcome, Dispatcher, Message,
    MessageTemplate, Recipient, RetryPolicy, TransportManager,
    smtp::{SmtpConfig, SmtpTransportBuilder},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Locations searched when neither `--config` nor [`CONFIG_ENV`] is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./herald.config.ron", "/etc/herald/herald.config.ron"];

/// Top level configuration, as read from `herald.config.ron`.
#[derive(Debug, Deserialize)]
pub struct Herald {
    #[serde(alias = "smtp")]
    transport: SmtpConfig,
    #[serde(default)]
    retry: RetryPolicy,
    #[serde(default)]
    batch: BatchConfig,
    #[serde(default)]
    audit: audit::AuditConfig,
}

impl Herald {
    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if `content` is not valid RON for this structure.
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Read and parse the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        Self::from_ron(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {e}", path.display()))
    }

    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub const fn batch(&self) -> &BatchConfig {
        &self.batch
    }

    /// Install logging and audit settings, then wire up the delivery stack.
    ///
    /// The transport itself is built lazily on first use.
    #[must_use]
    pub fn start(self, cancel: CancellationToken) -> Services {
        logging::init();
        audit::init(self.audit.clone());

        internal!(
            level = DEBUG,
            max_attempts = self.retry.max_attempts,
            concurrency = self.batch.concurrency,
            "Controller starting"
        );

        self.into_services(cancel)
    }

    /// Wire up the delivery stack without touching global state.
    #[must_use]
    pub fn into_services(self, cancel: CancellationToken) -> Services {
        let manager = Arc::new(TransportManager::new(SmtpTransportBuilder::new(
            self.transport,
        )));
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::clone(&manager), self.retry).with_cancellation(cancel));
        let batch = BatchDispatcher::new(Arc::clone(&dispatcher), self.batch);

        Services {
            manager,
            dispatcher,
            batch,
        }
    }
}

/// The running delivery stack.
#[derive(Debug, Clone)]
pub struct Services {
    manager: Arc<TransportManager>,
    dispatcher: Arc<Dispatcher>,
    batch: BatchDispatcher,
}

impl Services {
    /// Assemble services around an existing manager.
    #[must_use]
    pub fn with_manager(
        manager: Arc<TransportManager>,
        retry: RetryPolicy,
        batch: BatchConfig,
        cancel: CancellationToken,
    ) -> Self {
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::clone(&manager), retry).with_cancellation(cancel));
        let batch = BatchDispatcher::new(Arc::clone(&dispatcher), batch);

        Self {
            manager,
            dispatcher,
            batch,
        }
    }

    /// Build the transport once to prove the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns the configuration error reported by the transport builder.
    pub fn check(&self) -> anyhow::Result<()> {
        self.manager.acquire()?;
        internal!(level = INFO, "Transport configuration is valid");
        Ok(())
    }

    pub async fn send(&self, message: &Message) -> DeliveryOutcome {
        self.dispatcher.send(message).await
    }

    /// # Errors
    ///
    /// Returns an error if the transport could not be acquired.
    pub async fn send_many(
        &self,
        template: &MessageTemplate,
        recipients: &[Recipient],
    ) -> Result<BatchReport, BatchError> {
        self.batch.send_many(template, recipients).await
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit`, usually the `--config` flag
/// 2. `HERALD_CONFIG` environment variable
/// 3. ./herald.config.ron (current working directory)
/// 4. /etc/herald/herald.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error if an explicitly named file does not exist, or if no
/// default location holds a configuration file.
pub fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    find_config_file_in(explicit, std::env::var(CONFIG_ENV).ok(), &DEFAULT_CONFIG_PATHS)
}

fn find_config_file_in(
    explicit: Option<PathBuf>,
    env: Option<String>,
    defaults: &[&str],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Ok(path);
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config flag\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Parse a recipients list: one address per line, blank lines and `#`
/// comments ignored.
#[must_use]
pub fn parse_recipients(content: &str) -> Vec<Recipient> {
    content
        .lines()
        .map(|line| line.split_once('#').map_or(line, |(before, _)| before).trim())
        .filter(|line| !line.is_empty())
        .map(Recipient::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use herald_smtp::Security;
    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = r#"
        Herald (
            transport: (
                host: "smtp.example.com",
                port: 587,
                security: StartTls,
                username: "notify@example.com",
                secret: "abcd efgh ijkl mnop",
                secret_format: AppPassword,
            ),
            retry: (
                max_attempts: 4,
            ),
            batch: (
                concurrency: 2,
                tokens: {
                    "unsubscribe": "https://example.com/unsubscribe",
                },
            ),
            audit: (
                redact_recipients: true,
            ),
        )
    "#;

    #[test]
    fn test_parse_config() {
        let herald = Herald::from_ron(CONFIG).unwrap();

        assert_eq!(herald.transport.port, 587);
        assert_eq!(herald.transport.security, Security::StartTls);
        assert_eq!(herald.retry().max_attempts, 4);
        assert_eq!(herald.retry().attempt_timeout_ms, 60_000);
        assert_eq!(herald.batch().concurrency, 2);
        assert_eq!(
            herald.batch().tokens.get("unsubscribe").map(String::as_str),
            Some("https://example.com/unsubscribe")
        );
        assert!(herald.audit.enabled);
        assert!(herald.audit.redact_recipients);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let herald = Herald::from_ron(
            r#"(smtp: (host: "localhost", username: "a@example.com", secret: "pw"))"#,
        )
        .unwrap();

        assert_eq!(herald.retry(), &RetryPolicy::default());
        assert_eq!(herald.batch(), &BatchConfig::default());
    }

    #[test]
    fn test_check_reports_bad_credentials() {
        let herald = Herald::from_ron(
            r#"(smtp: (
                host: "localhost",
                username: "a@example.com",
                secret: "too short",
                secret_format: AppPassword,
            ))"#,
        )
        .unwrap();

        let services = herald.into_services(CancellationToken::new());
        let error = services.check().unwrap_err();
        assert!(error.to_string().contains("Malformed secret"), "{error}");
    }

    #[test]
    fn test_parse_recipients() {
        let recipients = parse_recipients(
            "# newsletter list\n\
             ann@example.com\n\
             \n\
             bob@example.com   # added by hand\n\
             \tcarol@example.com\n",
        );

        let addresses: Vec<_> = recipients.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(
            addresses,
            vec!["ann@example.com", "bob@example.com", "carol@example.com"]
        );
    }

    #[test]
    fn test_config_lookup_order() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.ron");
        let from_env = dir.path().join("env.ron");
        let default = dir.path().join("default.ron");
        for path in [&explicit, &from_env, &default] {
            fs::write(path, CONFIG).unwrap();
        }
        let default_str = default.to_string_lossy().to_string();
        let defaults = [default_str.as_str()];
        let env = Some(from_env.to_string_lossy().to_string());

        assert_eq!(
            find_config_file_in(Some(explicit.clone()), env.clone(), &defaults).unwrap(),
            explicit
        );
        assert_eq!(
            find_config_file_in(None, env, &defaults).unwrap(),
            from_env
        );
        assert_eq!(find_config_file_in(None, None, &defaults).unwrap(), default);

        let missing = dir.path().join("missing.ron");
        assert!(find_config_file_in(Some(missing), None, &defaults).is_err());
        assert!(
            find_config_file_in(None, Some("/nonexistent/herald.ron".to_string()), &defaults)
                .is_err()
        );
        assert!(find_config_file_in(None, None, &[]).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.config.ron");
        fs::write(&path, CONFIG).unwrap();

        let herald = Herald::load(&path).unwrap();
        assert_eq!(herald.retry().max_attempts, 4);

        let error = Herald::load(&dir.path().join("absent.ron")).unwrap_err();
        assert!(error.to_string().starts_with("Failed to read config"));
    }
}
