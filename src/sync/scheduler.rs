use std::future::Future;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;

use super::{CycleReport, SyncHandle, SyncOrchestrator};

/// Triggers sync cycles on a fixed cadence until shutdown.
pub struct Scheduler {
    orchestrator: SyncOrchestrator,
    interval: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: SyncOrchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Run until `shutdown` resolves.
    ///
    /// The first cycle starts immediately. A tick that finds a cycle still
    /// running is skipped. On shutdown the in-flight cycle is cancelled and
    /// awaited so its partial batch is committed before this returns.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut current: Option<SyncHandle> = None;

        tracing::info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    if let Some(handle) = current.take() {
                        tracing::info!("Shutdown requested, cancelling running sync cycle");
                        handle.cancel();
                        log_finished(handle.wait().await);
                    }
                    break;
                }

                result = wait_current(&mut current) => {
                    current = None;
                    log_finished(result);
                }

                _ = timer.tick() => {
                    if current.is_some() {
                        tracing::debug!("Previous sync cycle still running, skipping tick");
                        continue;
                    }
                    current = self.orchestrator.start();
                    if current.is_none() {
                        tracing::debug!("Sync cycle started elsewhere, skipping tick");
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

/// Resolves when the running cycle finishes; pends forever when there is none.
async fn wait_current(current: &mut Option<SyncHandle>) -> Result<CycleReport, JoinError> {
    match current {
        Some(handle) => handle.finished().await,
        None => std::future::pending().await,
    }
}

fn log_finished(result: Result<CycleReport, JoinError>) {
    match result {
        Ok(report) => tracing::info!(
            outcome = ?report.outcome,
            collected = report.collected,
            failed = report.failed,
            committed = report.committed,
            needs_reschedule = report.needs_reschedule,
            "Scheduled sync cycle done"
        ),
        Err(e) => tracing::error!(error = %e, "Sync cycle task failed"),
    }
}
