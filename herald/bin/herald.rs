//! Command-line front end for herald
//!
//! - `herald send` delivers one message and prints its outcome
//! - `herald batch` fans a template out to a recipients file
//! - `herald check` validates the transport configuration

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use herald::{Herald, Services, find_config_file, parse_recipients};
use herald_common::internal;
use herald_delivery::{Message, MessageTemplate, Recipient};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[cfg(not(unix))]
compile_error!("Only unix targets are currently supported");

/// Send notifications with bounded retries
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Send transactional and bulk notifications", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deliver a single message
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        /// File holding the HTML body
        #[arg(long)]
        html: PathBuf,
        /// File holding the plain-text body (derived from the HTML if absent)
        #[arg(long)]
        text: Option<PathBuf>,
    },
    /// Deliver a personalised copy to every address in a recipients file
    Batch {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        html: PathBuf,
        #[arg(long)]
        text: Option<PathBuf>,
        /// One address per line, `#` starts a comment
        #[arg(long)]
        recipients: PathBuf,
    },
    /// Validate the configuration by building the transport once
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config)?;
    let cancel = CancellationToken::new();
    let services = Herald::load(&config_path)?.start(cancel.clone());

    internal!(level = DEBUG, config = %config_path.display(), "Configuration loaded");

    tokio::spawn(shutdown(cancel));

    match cli.command {
        Commands::Send {
            to,
            subject,
            html,
            text,
        } => {
            let html = read(&html).await?;
            let mut message = Message::new(to, subject, html);
            if let Some(text) = text {
                message = message.with_text(read(&text).await?);
            }

            let outcome = services.send(&message).await;
            print_json(&outcome)?;
            Ok(exit_code(outcome.is_sent()))
        }
        Commands::Batch {
            subject,
            html,
            text,
            recipients,
        } => {
            let mut template = MessageTemplate::new(subject, read(&html).await?);
            if let Some(text) = text {
                template = template.with_text(read(&text).await?);
            }
            let recipients = parse_recipients(&read(&recipients).await?);

            run_batch(&services, &template, &recipients).await
        }
        Commands::Check => {
            services.check()?;
            println!("Configuration OK: {}", config_path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_batch(
    services: &Services,
    template: &MessageTemplate,
    recipients: &[Recipient],
) -> anyhow::Result<ExitCode> {
    match services.send_many(template, recipients).await {
        Ok(report) => {
            print_json(&report)?;
            Ok(exit_code(report.all_sent()))
        }
        Err(error) => {
            eprintln!("Batch not started: {error}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Cancel outstanding work on Ctrl-C or SIGTERM.
async fn shutdown(cancel: CancellationToken) -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = WARN, "CTRL+C entered, cancelling outstanding deliveries");
        }
        _ = terminate.recv() => {
            internal!(level = WARN, "Terminate signal received, cancelling outstanding deliveries");
        }
    }

    cancel.cancel();
    Ok(())
}

async fn read(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

const fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
