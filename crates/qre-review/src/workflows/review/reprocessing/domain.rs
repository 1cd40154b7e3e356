use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{EvidenceRequestId, FindingId, JobId};

/// What a reprocessing job re-evaluates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReprocessTarget {
    EvidenceRequest { request_id: EvidenceRequestId },
    Finding { finding_id: FindingId },
}

impl ReprocessTarget {
    pub fn label(&self) -> String {
        match self {
            ReprocessTarget::EvidenceRequest { request_id } => format!("request:{request_id}"),
            ReprocessTarget::Finding { finding_id } => format!("finding:{finding_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const fn label(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub const fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub rules_run: u32,
    pub findings_updated: u32,
    pub findings_auto_resolved: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprocessingJob {
    pub id: JobId,
    pub target: ReprocessTarget,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_summary: Option<JobSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReprocessingJob {
    pub fn queued(target: ReprocessTarget, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::generate(),
            target,
            status: JobStatus::Queued,
            job_summary: None,
            error: None,
            attempts: 0,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub target: Option<ReprocessTarget>,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn for_target(target: ReprocessTarget) -> Self {
        Self {
            target: Some(target),
            status: None,
        }
    }

    pub fn matches(&self, job: &ReprocessingJob) -> bool {
        self.target.as_ref().map_or(true, |target| &job.target == target)
            && self.status.map_or(true, |status| job.status == status)
    }
}

/// Result of `enqueue`; a busy target hands back the job already in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "job", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Queued(ReprocessingJob),
    Coalesced(ReprocessingJob),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &ReprocessingJob {
        match self {
            EnqueueOutcome::Queued(job) | EnqueueOutcome::Coalesced(job) => job,
        }
    }

    pub fn into_job(self) -> ReprocessingJob {
        match self {
            EnqueueOutcome::Queued(job) | EnqueueOutcome::Coalesced(job) => job,
        }
    }
}
