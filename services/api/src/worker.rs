use chrono::Utc;
use qre_review::workflows::review::reprocessing::{JobStatus, ReprocessingScheduler};
use qre_review::workflows::review::{ReviewDesk, ReviewError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on jobs run per tick so one busy engagement cannot starve the interval.
const MAX_JOBS_PER_TICK: usize = 32;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TickReport {
    pub(crate) completed: usize,
    pub(crate) failed: usize,
}

/// Run queued jobs until the queue is empty or the per-tick limit is reached.
pub(crate) fn drain_queue(scheduler: &ReprocessingScheduler) -> Result<TickReport, ReviewError> {
    let mut report = TickReport::default();
    for _ in 0..MAX_JOBS_PER_TICK {
        let Some(job) = scheduler.run_next(Utc::now())? else {
            break;
        };
        match job.status {
            JobStatus::Completed => report.completed += 1,
            _ => report.failed += 1,
        }
    }
    Ok(report)
}

pub(crate) fn spawn_reprocessing_worker(desk: Arc<ReviewDesk>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let tick_desk = Arc::clone(&desk);
            let drained =
                tokio::task::spawn_blocking(move || drain_queue(tick_desk.reprocessing())).await;
            match drained {
                Ok(Ok(report)) if report == TickReport::default() => {}
                Ok(Ok(report)) => debug!(
                    completed = report.completed,
                    failed = report.failed,
                    "reprocessing worker tick"
                ),
                Ok(Err(error)) => warn!(%error, "reprocessing worker tick failed"),
                Err(error) => warn!(%error, "reprocessing worker task panicked"),
            }
        }
    })
}
