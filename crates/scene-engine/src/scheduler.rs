//! Periodic driver for scene evaluation

use crate::engine::SceneEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to the background tick loop.
///
/// Ticks never overlap: each one is awaited to completion before the next
/// interval is polled.
pub struct Scheduler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    period: Duration,
}

impl Scheduler {
    /// Spawn the tick loop for `engine`
    #[must_use]
    pub fn spawn(engine: Arc<SceneEngine>, period: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match engine.tick().await {
                    Ok(report) if report.skipped_kill_switch => {
                        tracing::debug!("Tick skipped: kill switch active");
                    }
                    Ok(report) => {
                        tracing::debug!(
                            "Tick finished: {} evaluations, {} commands, {} expired, {} failures",
                            report.evaluations.len(),
                            report.commands_issued(),
                            report.expired.len(),
                            report.failures.len()
                        );
                        for failure in &report.failures {
                            tracing::warn!("Tick failure in {}: {}", failure.scope, failure.error);
                        }
                    }
                    Err(e) => tracing::error!("Tick aborted: {}", e),
                }
            }

            tracing::info!("Scene scheduler stopped");
        });

        tracing::info!("Scheduled scene evaluation every {:?}", period);
        Self {
            token,
            handle: Some(handle),
            period,
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop, letting an in-flight tick finish
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!("Scene scheduler task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
