//! Periodic ping that keeps the companion service from idling out.
//!
//! The task owns its interval and a [`CancellationToken`]; shutdown cancels
//! the token and awaits the join handle. Failed pings are logged and the
//! task simply waits for the next tick.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use courier_core::config::KeepAliveConfig;
use reqwest::{Client, StatusCode};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct KeepAlive {
    client: Client,
    target: String,
    interval: Duration,
}

impl KeepAlive {
    pub fn new(config: &KeepAliveConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("courier-keepalive/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .context("build keep-alive http client")?;

        Ok(Self {
            client,
            target: config.target(),
            interval: config.interval,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// One bounded GET against the companion endpoint. Non-2xx is a failure.
    pub async fn ping_once(&self) -> Result<StatusCode> {
        let response = self
            .client
            .get(&self.target)
            .send()
            .await
            .with_context(|| format!("ping {}", self.target))?;

        let status = response.status();
        if !status.is_success() {
            bail!("ping {} returned {status}", self.target);
        }
        Ok(status)
    }

    /// Start pinging every `interval`, first ping one interval from now.
    pub fn spawn(self) -> KeepAliveHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(token).await });
        KeepAliveHandle { cancel, join }
    }

    async fn run(self, cancel: CancellationToken) -> u64 {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0_u64;

        info!(
            target = %self.target,
            interval_secs = self.interval.as_secs(),
            "keep-alive task started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    attempts += 1;
                    match self.ping_once().await {
                        Ok(status) => info!(
                            target = %self.target,
                            status = status.as_u16(),
                            "keep-alive ping succeeded"
                        ),
                        Err(error) => warn!(
                            target = %self.target,
                            error = %format!("{error:#}"),
                            "keep-alive ping failed"
                        ),
                    }
                }
            }
        }

        info!(attempts, "keep-alive task stopped");
        attempts
    }
}

pub struct KeepAliveHandle {
    cancel: CancellationToken,
    join: JoinHandle<u64>,
}

impl KeepAliveHandle {
    /// Stop the timer and wait for an in-flight ping to finish. Returns the
    /// number of ping cycles that ran.
    pub async fn shutdown(self) -> Result<u64> {
        self.cancel.cancel();
        let attempts = self.join.await.context("join keep-alive task")?;
        Ok(attempts)
    }
}
