//! Bounded polling for callers waiting on reprocessing of a target.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use super::super::error::ReviewError;
use super::domain::{JobFilter, JobStatus, ReprocessTarget, ReprocessingJob};
use super::scheduler::ReprocessingScheduler;

/// Default age after which an active job is treated as failed.
pub const DEFAULT_STALL_CEILING: Duration = Duration::from_secs(10 * 60);

/// How a job looks to a poller, which may differ from the stored status once a job stalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobHealth {
    Queued,
    Running,
    Completed,
    Failed,
    /// Still queued or running past the stall ceiling.
    Stalled,
}

impl JobHealth {
    pub fn classify(job: &ReprocessingJob, now: DateTime<Utc>, stall_ceiling: Duration) -> Self {
        match job.status {
            JobStatus::Completed => JobHealth::Completed,
            JobStatus::Failed => JobHealth::Failed,
            JobStatus::Queued | JobStatus::Running => {
                let since = job.started_at.unwrap_or(job.created_at);
                let age = (now - since).to_std().unwrap_or(Duration::ZERO);
                if age > stall_ceiling {
                    JobHealth::Stalled
                } else if job.status == JobStatus::Running {
                    JobHealth::Running
                } else {
                    JobHealth::Queued
                }
            }
        }
    }

    pub const fn needs_attention(self) -> bool {
        matches!(self, JobHealth::Failed | JobHealth::Stalled)
    }

    pub const fn is_pending(self) -> bool {
        matches!(self, JobHealth::Queued | JobHealth::Running)
    }
}

/// Exponential backoff with jitter, capped by an overall ceiling.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// 0.0-1.0; fraction of each delay randomized.
    pub jitter: f64,
    pub ceiling: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            ceiling: DEFAULT_STALL_CEILING,
        }
    }
}

impl PollPolicy {
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before poll number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        let delay = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            rand::thread_rng().gen_range((capped - spread)..=(capped + spread))
        } else {
            capped
        };
        Duration::from_secs_f64(delay.clamp(0.0, self.max_delay.as_secs_f64()))
    }
}

/// Poll until no job for `target` is queued or running, returning the target's jobs.
///
/// Fails with `JobTimedOut` once the policy ceiling passes or any job outlives it.
pub async fn wait_for_target(
    scheduler: &ReprocessingScheduler,
    target: &ReprocessTarget,
    policy: &PollPolicy,
) -> Result<Vec<ReprocessingJob>, ReviewError> {
    let started = tokio::time::Instant::now();
    let filter = JobFilter::for_target(target.clone());
    let mut attempt = 0u32;

    loop {
        let jobs = scheduler.list(&filter)?;
        let now = Utc::now();
        let health: Vec<JobHealth> = jobs
            .iter()
            .map(|job| JobHealth::classify(job, now, policy.ceiling))
            .collect();

        if health.contains(&JobHealth::Stalled) {
            warn!(job_target = %target.label(), "reprocessing job stalled past ceiling");
            return Err(timed_out(target, started.elapsed()));
        }
        if !health.iter().any(|state| state.is_pending()) {
            return Ok(jobs);
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.ceiling {
            warn!(
                job_target = %target.label(),
                waited_secs = elapsed.as_secs(),
                "gave up waiting for reprocessing"
            );
            return Err(timed_out(target, elapsed));
        }

        let delay = policy
            .delay_for_attempt(attempt)
            .min(policy.ceiling.saturating_sub(elapsed));
        debug!(
            job_target = %target.label(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "waiting on reprocessing"
        );
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

fn timed_out(target: &ReprocessTarget, waited: Duration) -> ReviewError {
    ReviewError::JobTimedOut {
        target: target.label(),
        waited_secs: waited.as_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::review::domain::FindingId;
    use chrono::Duration as ChronoDuration;

    fn job(status: JobStatus, age_secs: i64, now: DateTime<Utc>) -> ReprocessingJob {
        let mut job = ReprocessingJob::queued(
            ReprocessTarget::Finding {
                finding_id: FindingId::from("fnd-1"),
            },
            now - ChronoDuration::seconds(age_secs),
        );
        job.status = status;
        if status == JobStatus::Running {
            job.started_at = Some(job.created_at);
        }
        job
    }

    #[test]
    fn active_jobs_past_the_ceiling_are_stalled() {
        let now = Utc::now();
        let ceiling = DEFAULT_STALL_CEILING;
        assert_eq!(
            JobHealth::classify(&job(JobStatus::Running, 30, now), now, ceiling),
            JobHealth::Running
        );
        assert_eq!(
            JobHealth::classify(&job(JobStatus::Running, 601, now), now, ceiling),
            JobHealth::Stalled
        );
        assert_eq!(
            JobHealth::classify(&job(JobStatus::Queued, 900, now), now, ceiling),
            JobHealth::Stalled
        );
        assert_eq!(
            JobHealth::classify(&job(JobStatus::Completed, 900, now), now, ceiling),
            JobHealth::Completed
        );
        assert!(JobHealth::Stalled.needs_attention());
    }

    #[test]
    fn backoff_grows_and_caps_without_jitter() {
        let policy = PollPolicy::default().with_jitter(0.0);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = PollPolicy::default().with_jitter(0.5);
        for attempt in 0..8 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= policy.max_delay);
        }
    }
}
