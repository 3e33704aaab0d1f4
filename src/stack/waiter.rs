//! Stack waiter
//!
//! Polls the provisioning engine until a stack reaches a terminal status,
//! backing off exponentially between polls. Intended for CLI and operator
//! tooling; request handlers never block on it.

use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::WaiterConfig;
use crate::engine::{EngineError, ProvisioningEngine};
use crate::status::OnboardingStatus;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("stack {stack} did not settle after {attempts} polls (last status {last_status:?})")]
    TimedOut {
        stack: String,
        attempts: u32,
        last_status: Option<String>,
    },
    #[error("wait for stack {0} was cancelled")]
    Cancelled(String),
    #[error("stack {0} does not exist")]
    StackNotFound(String),
    #[error(transparent)]
    Engine(EngineError),
}

impl From<EngineError> for WaitError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::StackNotFound(stack) => Self::StackNotFound(stack),
            other => Self::Engine(other),
        }
    }
}

/// Final observation of a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalStack {
    pub native_status: String,
    pub status: Option<OnboardingStatus>,
    pub attempts: u32,
}

/// Native statuses after which the engine does no further work on a stack.
pub fn is_terminal_stack_status(native: &str) -> bool {
    native.ends_with("_COMPLETE") || native.ends_with("_FAILED")
}

pub struct StackWaiter {
    engine: Arc<dyn ProvisioningEngine>,
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl StackWaiter {
    pub fn new(engine: Arc<dyn ProvisioningEngine>, config: &WaiterConfig) -> Self {
        Self {
            engine,
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Polls until `stack` settles, attempts run out or `cancel` fires.
    #[instrument(skip(self, cancel))]
    pub async fn wait_for_terminal(
        &self,
        stack: &str,
        cancel: CancellationToken,
    ) -> Result<TerminalStack, WaitError> {
        let started = Instant::now();
        let mut delay = self.initial_delay;
        let mut last_status = None;

        for attempt in 1..=self.max_attempts {
            let native = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled(stack.to_string())),
                described = self.engine.describe_stack_status(stack) => described?,
            };
            debug!(attempt, status = %native, "Polled stack status");

            if is_terminal_stack_status(&native) {
                let elapsed = started.elapsed();
                histogram!("stack_wait_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
                info!(attempts = attempt, status = %native, "Stack reached terminal status");
                return Ok(TerminalStack {
                    status: OnboardingStatus::from_stack_status(&native),
                    native_status: native,
                    attempts: attempt,
                });
            }
            last_status = Some(native);

            if attempt == self.max_attempts {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(WaitError::Cancelled(stack.to_string())),
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(self.max_delay);
        }

        Err(WaitError::TimedOut {
            stack: stack.to_string(),
            attempts: self.max_attempts,
            last_status,
        })
    }
}
