mod actions;
mod config;
mod github;
mod resolver;
mod retry;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::actions::Workflow;
use crate::config::Config;
use crate::resolver::{DEFAULT_AUDIENCE, DEFAULT_EXCHANGE_URL, ExchangeSettings, ResolverChain};
use crate::retry::RetryPolicy;

const OUTPUT_KEY: &str = "GITHUB_TOKEN";

#[derive(Parser, Debug)]
#[command(
    name = "ghtoken",
    version,
    about = "Resolve a GitHub token for the current workflow run",
    long_about = None
)]
struct Cli {
    /// Endpoint that trades an OIDC token for an app token
    #[arg(long, env = "GHTOKEN_EXCHANGE_URL", default_value = DEFAULT_EXCHANGE_URL)]
    exchange_url: String,

    /// Audience requested for the OIDC token
    #[arg(long, env = "GHTOKEN_OIDC_AUDIENCE", default_value = DEFAULT_AUDIENCE)]
    audience: String,

    /// Attempts per OIDC request or exchange, including the first one
    #[arg(long, env = "GHTOKEN_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: usize,

    /// Delay before the first retry, doubled after each failure
    #[arg(long, env = "GHTOKEN_INITIAL_DELAY_MS", default_value_t = 5000)]
    initial_delay_ms: u64,
}

impl Cli {
    fn exchange_settings(&self) -> ExchangeSettings {
        ExchangeSettings {
            exchange_url: self.exchange_url.clone(),
            audience: self.audience.clone(),
            retry: RetryPolicy::default()
                .with_max_attempts(self.max_attempts.max(1))
                .with_initial_delay(Duration::from_millis(self.initial_delay_ms)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries workflow commands, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = Config::from_env();
    let mut workflow = Workflow::stdout(config.output_file.clone());

    match resolve(&config, cli.exchange_settings()).await {
        Ok(token) => {
            workflow.add_mask(&token)?;
            workflow
                .set_output(OUTPUT_KEY, &token)
                .context("failed to publish token")?;
            Ok(())
        }
        Err(err) => {
            tracing::error!("token resolution failed: {:#}", err);
            workflow.set_failed(&failure_message(&err))?;
            std::process::exit(1);
        }
    }
}

async fn resolve(config: &Config, exchange: ExchangeSettings) -> Result<String> {
    let chain = ResolverChain::from_config(config, exchange)?;
    let resolved = chain.resolve().await?;
    Ok(resolved.token)
}

fn failure_message(err: &anyhow::Error) -> String {
    format!(
        "Failed to setup GitHub token: {:#}\n\n\
         If you use the Rehearsal GitHub App, check that REHEARSAL_APP_ID and \
         REHEARSAL_APP_PRIVATE_KEY are set and that the app is installed on this repository.\n\
         Otherwise the OIDC exchange needs `id-token: write` in the workflow permissions, \
         or pass a token of your own through OVERRIDE_GITHUB_TOKEN.",
        err
    )
}
