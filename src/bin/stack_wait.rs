//! Blocks until a tenant stack settles, then prints its final status.
//!
//! Exits non-zero when the stack ends in a failed state, disappears, or does
//! not settle within the configured attempts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use onboarding::{
    config::{ConfigLoader, WaiterConfig},
    engine::HttpProvisioningEngine,
    stack::StackWaiter,
    status::OnboardingStatus,
    telemetry,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "stack-wait", about = "Wait for a tenant stack to reach a terminal status")]
struct Args {
    /// Stack name or id
    stack: String,

    /// Override the configured first poll delay (milliseconds)
    #[arg(long)]
    initial_delay_ms: Option<u64>,

    /// Override the configured delay cap (milliseconds)
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Override the configured number of polls
    #[arg(long)]
    max_attempts: Option<u32>,
}

impl Args {
    fn waiter_config(&self, base: &WaiterConfig) -> WaiterConfig {
        WaiterConfig {
            initial_delay_ms: self.initial_delay_ms.unwrap_or(base.initial_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    let waiter_config = args.waiter_config(&config.waiter);
    waiter_config.validate()?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;
    let engine = Arc::new(HttpProvisioningEngine::new(
        http,
        config.onboarding.engine_url()?,
    ));
    let waiter = StackWaiter::new(engine, &waiter_config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let terminal = waiter
        .wait_for_terminal(&args.stack, cancel)
        .await
        .with_context(|| format!("waiting for stack {}", args.stack))?;

    println!("{} {}", args.stack, terminal.native_status);
    if terminal.status == Some(OnboardingStatus::Failed) {
        bail!("stack {} ended in {}", args.stack, terminal.native_status);
    }
    Ok(())
}
