use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tripclaim::{delivery, AppConfig, CancelToken, PipelineError, PipelineOrchestrator, Stage};
use tripclaim_rides::{Credential, RidersClient};

/// Builds a month's ride expense claim: trip list, merged receipts and a
/// filled claim form.
#[derive(Parser)]
#[command(name = "tripclaim", version, about, long_about = None)]
struct Cli {
    /// Month to claim (1-12). Defaults to last month; 12 always means
    /// December of last year.
    #[arg(value_parser = clap::value_parser!(u32).range(1..=12))]
    month: Option<u32>,

    /// Configuration file (default: ./tripclaim.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Skip bundling and email even when configured
    #[arg(long)]
    no_deliver: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<PipelineError>() {
                Some(failure) => {
                    error!(stage = %failure.stage, "{failure}");
                    eprintln!("error: {failure}");
                    eprintln!("hint: {}", failure.remediation().advice());
                }
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load_default(),
    }
    .map_err(|e| PipelineError::new(Stage::Init, e))?;

    let credential =
        Credential::from_file(&config.token_file).map_err(|e| PipelineError::new(Stage::Init, e))?;
    let client =
        RidersClient::new(&config.api, &credential).map_err(|e| PipelineError::new(Stage::Init, e))?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current stage");
            on_interrupt.cancel();
        }
    });

    let summary = PipelineOrchestrator::new(&config, client.clone(), client)
        .with_cancel(cancel)
        .run(cli.month, Utc::now())
        .await?;
    println!("{summary}");

    if cli.no_deliver || !config.bundle_enabled() {
        return Ok(());
    }

    let bundle = delivery::bundle_run(&summary).context("cannot write bundle")?;
    println!("  bundle: {}", bundle.display());

    if config.email.enabled {
        delivery::email_bundle(&config.email.smtp, &summary, &bundle)
            .await
            .context("cannot email bundle")?;
        info!(to = ?config.email.smtp.to, "bundle emailed");
    }
    Ok(())
}
