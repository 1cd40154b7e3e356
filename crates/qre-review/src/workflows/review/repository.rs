use super::domain::{ClientId, EvidenceFileId, EvidenceRequestId, FindingId, JobId};
use super::evidence::domain::{EvidenceFile, EvidenceRequest, EvidenceRequestFilter, EvidenceRequestStatus};
use super::findings::domain::{EntityRef, EntitySnapshot, Finding, FindingFilter};
use super::reprocessing::domain::{EnqueueOutcome, JobFilter, ReprocessingJob};
use super::resolution::domain::{Resolution, ResolutionCommit};
use super::upload::token::{QuotaReservation, UploadToken};
use chrono::{DateTime, Utc};

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists or was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Findings, their append-only resolution history, and the entity snapshots rules read.
pub trait FindingRepository: Send + Sync {
    fn insert_finding(&self, finding: Finding) -> Result<Finding, RepositoryError>;

    /// Overwrite rule output (severity, trigger evidence, impact) while keeping the stored status.
    fn refresh_finding(&self, finding: Finding) -> Result<(), RepositoryError>;

    fn fetch_finding(&self, id: &FindingId) -> Result<Option<Finding>, RepositoryError>;

    fn find_for_rule(
        &self,
        client_id: &ClientId,
        tax_year: i32,
        rule_id: &str,
        entity: &EntityRef,
    ) -> Result<Option<Finding>, RepositoryError>;

    fn list_findings(&self, filter: &FindingFilter) -> Result<Vec<Finding>, RepositoryError>;

    fn resolutions(&self, finding_id: &FindingId) -> Result<Vec<Resolution>, RepositoryError>;

    fn resolution_by_key(
        &self,
        finding_id: &FindingId,
        idempotency_key: &str,
    ) -> Result<Option<Resolution>, RepositoryError>;

    /// Append the resolution, move the finding to `status_to`, and apply any entity patch as
    /// one unit. Returns the updated finding.
    fn commit_resolution(&self, commit: ResolutionCommit) -> Result<Finding, RepositoryError>;

    fn snapshot(&self, entity: &EntityRef) -> Result<Option<EntitySnapshot>, RepositoryError>;
}

pub trait EvidenceRepository: Send + Sync {
    fn insert_request(&self, request: EvidenceRequest) -> Result<EvidenceRequest, RepositoryError>;

    fn fetch_request(
        &self,
        id: &EvidenceRequestId,
    ) -> Result<Option<EvidenceRequest>, RepositoryError>;

    fn list_requests(
        &self,
        filter: &EvidenceRequestFilter,
    ) -> Result<Vec<EvidenceRequest>, RepositoryError>;

    /// Replace the request if its stored status still equals `expected_status`.
    fn update_request(
        &self,
        request: EvidenceRequest,
        expected_status: EvidenceRequestStatus,
    ) -> Result<(), RepositoryError>;

    fn append_files(&self, files: Vec<EvidenceFile>) -> Result<(), RepositoryError>;

    fn fetch_file(&self, id: &EvidenceFileId) -> Result<Option<EvidenceFile>, RepositoryError>;

    fn update_file(&self, file: EvidenceFile) -> Result<(), RepositoryError>;

    fn files_for_request(
        &self,
        request_id: &EvidenceRequestId,
    ) -> Result<Vec<EvidenceFile>, RepositoryError>;

    fn files_for_findings(
        &self,
        finding_ids: &[FindingId],
    ) -> Result<Vec<EvidenceFile>, RepositoryError>;
}

pub trait TokenRepository: Send + Sync {
    /// Store `token`, revoking any active token for the same request in the same step.
    /// Returns the token that was revoked, if any.
    fn issue(
        &self,
        token: UploadToken,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadToken>, RepositoryError>;

    fn find_by_hash(&self, token_hash: &str) -> Result<Option<UploadToken>, RepositoryError>;

    fn active_for_request(
        &self,
        request_id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadToken>, RepositoryError>;

    fn revoke(
        &self,
        request_id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadToken>, RepositoryError>;

    /// Conditionally decrement `uploads_remaining` by one. Must be a single atomic step.
    fn try_consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<QuotaReservation, RepositoryError>;

    /// Return one unit of quota taken by `try_consume` when the upload could not be recorded.
    fn release(&self, token_hash: &str) -> Result<(), RepositoryError>;
}

pub trait JobRepository: Send + Sync {
    /// Insert `job` unless the target already has a queued or running job, in which case the
    /// existing job is returned as `Coalesced`.
    fn enqueue(&self, job: ReprocessingJob) -> Result<EnqueueOutcome, RepositoryError>;

    fn fetch_job(&self, id: &JobId) -> Result<Option<ReprocessingJob>, RepositoryError>;

    /// Jobs matching `filter`, oldest first.
    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ReprocessingJob>, RepositoryError>;

    /// Move the job to `running`. Fails with `Conflict` if this job or another job for the same
    /// target is already running.
    fn claim(&self, id: &JobId, now: DateTime<Utc>) -> Result<ReprocessingJob, RepositoryError>;

    /// Persist the terminal state of a claimed job.
    fn finish(&self, job: ReprocessingJob) -> Result<(), RepositoryError>;
}

/// Durable storage for uploaded bytes, addressed by an opaque key.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), RepositoryError>;
    fn delete(&self, key: &str) -> Result<(), RepositoryError>;
}
