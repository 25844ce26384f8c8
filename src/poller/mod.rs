//! App poller daemon — waits for the executor, then keeps the app
//! resources in sync.
//!
//! Two phases:
//! - **Bootstrapping**: up to [`MAX_STARTUP_ATTEMPTS`] quiet health
//!   checks, [`STARTUP_RETRY_DELAY`] apart. The first healthy answer
//!   moves on; exhausting the budget is fatal (exit code 1).
//! - **Running**: forever: health check, poll if healthy, sleep the
//!   poll interval. An unhealthy executor just skips that cycle's poll.
//!
//! The stop token is only looked at between Running iterations. A
//! hanging health check or poll stalls the loop; the poller adds no
//! timeout of its own.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::error::{PollerError, Result};
use crate::handler::ResourceHandler;
use crate::location::AppLocation;

pub const MAX_STARTUP_ATTEMPTS: u32 = 10;
pub const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerPhase {
    Bootstrapping,
    Running,
    Stopped,
    Failed,
}

/// Snapshot published to anyone holding a [`Poller::status`] receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollerStatus {
    pub phase: PollerPhase,
    pub startup_attempts: u32,
    /// Completed Running iterations.
    pub iterations: u64,
    pub polls: u64,
    pub last_healthy: Option<bool>,
}

impl Default for PollerStatus {
    fn default() -> Self {
        Self {
            phase: PollerPhase::Bootstrapping,
            startup_attempts: 0,
            iterations: 0,
            polls: 0,
            last_healthy: None,
        }
    }
}

pub struct Poller {
    location: AppLocation,
    handler: Box<dyn ResourceHandler>,
    poll_interval: Duration,
    status: watch::Sender<PollerStatus>,
}

impl Poller {
    /// `handler` must already be the one selected for `location`; it is
    /// never replaced.
    pub fn new(
        location: AppLocation,
        handler: Box<dyn ResourceHandler>,
        poll_interval: Duration,
    ) -> Self {
        let (status, _) = watch::channel(PollerStatus::default());
        Self { location, handler, poll_interval, status }
    }

    /// Live status feed, safe to read from other tasks.
    pub fn status(&self) -> watch::Receiver<PollerStatus> {
        self.status.subscribe()
    }

    /// Bootstrap, then run until `stop` is cancelled or the handler faults.
    pub async fn run(mut self, stop: CancellationToken) -> Result<()> {
        let span = info_span!(
            "poller",
            backend = self.handler.backend(),
            location = %self.location,
            pid = std::process::id(),
        );
        async move {
            self.wait_for_executor().await?;
            self.run_loop(stop).await
        }
        .instrument(span)
        .await
    }

    async fn wait_for_executor(&mut self) -> Result<()> {
        for attempt in 1..=MAX_STARTUP_ATTEMPTS {
            info!(attempt, max_attempts = MAX_STARTUP_ATTEMPTS, "⏳ Waiting for executor to start up");
            let healthy = self.handler.check_health(false).await;
            self.status.send_modify(|s| {
                s.startup_attempts = attempt;
                s.last_healthy = Some(healthy);
            });

            if healthy {
                self.status.send_modify(|s| s.phase = PollerPhase::Running);
                return Ok(());
            }
            if attempt < MAX_STARTUP_ATTEMPTS {
                time::sleep(STARTUP_RETRY_DELAY).await;
            }
        }

        let window = STARTUP_RETRY_DELAY * (MAX_STARTUP_ATTEMPTS - 1);
        error!(
            attempts = MAX_STARTUP_ATTEMPTS,
            "Executor failed to start within {}s. Please check the system configuration and restart.",
            window.as_secs()
        );
        self.status.send_modify(|s| s.phase = PollerPhase::Failed);
        Err(PollerError::ExecutorUnavailable { attempts: MAX_STARTUP_ATTEMPTS })
    }

    async fn run_loop(&mut self, stop: CancellationToken) -> Result<()> {
        loop {
            if stop.is_cancelled() {
                info!("Poller stopped");
                self.status.send_modify(|s| s.phase = PollerPhase::Stopped);
                return Ok(());
            }

            let healthy = self.handler.check_health(true).await;
            if healthy {
                if let Err(e) = self.handler.poll().await {
                    self.status.send_modify(|s| {
                        s.phase = PollerPhase::Failed;
                        s.last_healthy = Some(true);
                    });
                    return Err(PollerError::Handler(e));
                }
            }
            self.status.send_modify(|s| {
                s.iterations += 1;
                s.polls += u64::from(healthy);
                s.last_healthy = Some(healthy);
            });

            time::sleep(self.poll_interval).await;
        }
    }
}
