//! In-process stores backing the service binary, the demo, and tests.
//!
//! Every repository trait is implemented over a single mutex so each call is one atomic step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{ClientId, EvidenceFileId, EvidenceRequestId, FindingId, JobId, OrganizationId};
use super::evidence::domain::{
    EvidenceFile, EvidenceRequest, EvidenceRequestFilter, EvidenceRequestStatus,
};
use super::findings::domain::{EntityRef, EntitySnapshot, Finding, FindingFilter};
use super::repository::{
    BlobStore, EvidenceRepository, FindingRepository, JobRepository, RepositoryError,
    TokenRepository,
};
use super::reprocessing::domain::{
    EnqueueOutcome, JobFilter, JobStatus, ReprocessingJob,
};
use super::resolution::domain::{Resolution, ResolutionCommit};
use super::settings::{OrganizationDirectory, OrganizationSettings};
use super::upload::token::{QuotaReservation, UploadToken};

#[derive(Default)]
struct State {
    findings: Vec<Finding>,
    resolutions: Vec<Resolution>,
    snapshots: HashMap<EntityRef, EntitySnapshot>,
    requests: Vec<EvidenceRequest>,
    files: Vec<EvidenceFile>,
    tokens: Vec<UploadToken>,
    jobs: Vec<ReprocessingJob>,
}

#[derive(Default, Clone)]
pub struct MemoryReviewStore {
    state: Arc<Mutex<State>>,
    fail_quota: Arc<AtomicBool>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make upload quota reservations fail, for exercising partial upload batches.
    pub fn fail_quota(&self, fail: bool) {
        self.fail_quota.store(fail, Ordering::SeqCst);
    }

    /// Load or replace the snapshot rules evaluate for an entity.
    pub fn put_snapshot(&self, snapshot: EntitySnapshot) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        state.snapshots.insert(snapshot.entity.clone(), snapshot);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("review store mutex poisoned".to_string()))
    }
}

impl FindingRepository for MemoryReviewStore {
    fn insert_finding(&self, finding: Finding) -> Result<Finding, RepositoryError> {
        let mut state = self.lock()?;
        if state.findings.iter().any(|existing| existing.id == finding.id) {
            return Err(RepositoryError::Conflict);
        }
        state.findings.push(finding.clone());
        Ok(finding)
    }

    fn refresh_finding(&self, finding: Finding) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let stored = state
            .findings
            .iter_mut()
            .find(|existing| existing.id == finding.id)
            .ok_or(RepositoryError::NotFound)?;
        let status = stored.status;
        *stored = Finding { status, ..finding };
        Ok(())
    }

    fn fetch_finding(&self, id: &FindingId) -> Result<Option<Finding>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.findings.iter().find(|finding| &finding.id == id).cloned())
    }

    fn find_for_rule(
        &self,
        client_id: &ClientId,
        tax_year: i32,
        rule_id: &str,
        entity: &EntityRef,
    ) -> Result<Option<Finding>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .findings
            .iter()
            .find(|finding| {
                &finding.client_id == client_id
                    && finding.tax_year == tax_year
                    && finding.rule_id == rule_id
                    && &finding.entity == entity
            })
            .cloned())
    }

    fn list_findings(&self, filter: &FindingFilter) -> Result<Vec<Finding>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .findings
            .iter()
            .filter(|finding| filter.matches(finding))
            .cloned()
            .collect())
    }

    fn resolutions(&self, finding_id: &FindingId) -> Result<Vec<Resolution>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .resolutions
            .iter()
            .filter(|resolution| &resolution.finding_id == finding_id)
            .cloned()
            .collect())
    }

    fn resolution_by_key(
        &self,
        finding_id: &FindingId,
        idempotency_key: &str,
    ) -> Result<Option<Resolution>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .resolutions
            .iter()
            .find(|resolution| {
                &resolution.finding_id == finding_id
                    && resolution.idempotency_key.as_deref() == Some(idempotency_key)
            })
            .cloned())
    }

    fn commit_resolution(&self, commit: ResolutionCommit) -> Result<Finding, RepositoryError> {
        let mut state = self.lock()?;
        let resolution = commit.resolution;

        if let Some(key) = resolution.idempotency_key.as_deref() {
            let duplicate = state.resolutions.iter().any(|existing| {
                existing.finding_id == resolution.finding_id
                    && existing.idempotency_key.as_deref() == Some(key)
            });
            if duplicate {
                return Err(RepositoryError::Conflict);
            }
        }

        let index = state
            .findings
            .iter()
            .position(|finding| finding.id == resolution.finding_id)
            .ok_or(RepositoryError::NotFound)?;
        if state.findings[index].status != resolution.status_from {
            return Err(RepositoryError::Conflict);
        }

        if let Some(patch) = commit.entity_patch {
            let snapshot = state
                .snapshots
                .get_mut(&patch.entity)
                .ok_or(RepositoryError::NotFound)?;
            snapshot.fields.extend(patch.fields);
        }

        let finding = &mut state.findings[index];
        finding.status = resolution.status_to;
        finding.updated_at = commit.at;
        let updated = finding.clone();
        state.resolutions.push(resolution);
        Ok(updated)
    }

    fn snapshot(&self, entity: &EntityRef) -> Result<Option<EntitySnapshot>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.snapshots.get(entity).cloned())
    }
}

impl EvidenceRepository for MemoryReviewStore {
    fn insert_request(&self, request: EvidenceRequest) -> Result<EvidenceRequest, RepositoryError> {
        let mut state = self.lock()?;
        if state.requests.iter().any(|existing| existing.id == request.id) {
            return Err(RepositoryError::Conflict);
        }
        state.requests.push(request.clone());
        Ok(request)
    }

    fn fetch_request(
        &self,
        id: &EvidenceRequestId,
    ) -> Result<Option<EvidenceRequest>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.requests.iter().find(|request| &request.id == id).cloned())
    }

    fn list_requests(
        &self,
        filter: &EvidenceRequestFilter,
    ) -> Result<Vec<EvidenceRequest>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .requests
            .iter()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect())
    }

    fn update_request(
        &self,
        request: EvidenceRequest,
        expected_status: EvidenceRequestStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let stored = state
            .requests
            .iter_mut()
            .find(|existing| existing.id == request.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.status != expected_status {
            return Err(RepositoryError::Conflict);
        }
        *stored = request;
        Ok(())
    }

    fn append_files(&self, files: Vec<EvidenceFile>) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        for file in &files {
            if !state.requests.iter().any(|request| request.id == file.request_id) {
                return Err(RepositoryError::NotFound);
            }
        }
        state.files.extend(files);
        Ok(())
    }

    fn fetch_file(&self, id: &EvidenceFileId) -> Result<Option<EvidenceFile>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.files.iter().find(|file| &file.id == id).cloned())
    }

    fn update_file(&self, file: EvidenceFile) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let stored = state
            .files
            .iter_mut()
            .find(|existing| existing.id == file.id)
            .ok_or(RepositoryError::NotFound)?;
        *stored = file;
        Ok(())
    }

    fn files_for_request(
        &self,
        request_id: &EvidenceRequestId,
    ) -> Result<Vec<EvidenceFile>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .files
            .iter()
            .filter(|file| &file.request_id == request_id)
            .cloned()
            .collect())
    }

    fn files_for_findings(
        &self,
        finding_ids: &[FindingId],
    ) -> Result<Vec<EvidenceFile>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .files
            .iter()
            .filter(|file| {
                file.finding_id
                    .as_ref()
                    .map_or(false, |finding_id| finding_ids.contains(finding_id))
            })
            .cloned()
            .collect())
    }
}

impl TokenRepository for MemoryReviewStore {
    fn issue(
        &self,
        token: UploadToken,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadToken>, RepositoryError> {
        let mut state = self.lock()?;
        if state
            .tokens
            .iter()
            .any(|existing| existing.token_hash == token.token_hash)
        {
            return Err(RepositoryError::Conflict);
        }
        let mut revoked = None;
        for existing in state
            .tokens
            .iter_mut()
            .filter(|existing| existing.request_id == token.request_id)
            .filter(|existing| existing.revoked_at.is_none())
        {
            existing.revoked_at = Some(now);
            revoked = Some(existing.clone());
        }
        state.tokens.push(token);
        Ok(revoked)
    }

    fn find_by_hash(&self, token_hash: &str) -> Result<Option<UploadToken>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .tokens
            .iter()
            .find(|token| token.token_hash == token_hash)
            .cloned())
    }

    fn active_for_request(
        &self,
        request_id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadToken>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .tokens
            .iter()
            .find(|token| &token.request_id == request_id && token.is_active(now))
            .cloned())
    }

    fn revoke(
        &self,
        request_id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadToken>, RepositoryError> {
        let mut state = self.lock()?;
        let mut revoked = None;
        for token in state
            .tokens
            .iter_mut()
            .filter(|token| &token.request_id == request_id && token.revoked_at.is_none())
        {
            token.revoked_at = Some(now);
            revoked = Some(token.clone());
        }
        Ok(revoked)
    }

    fn try_consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<QuotaReservation, RepositoryError> {
        if self.fail_quota.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("quota reservation failed".to_string()));
        }
        let mut state = self.lock()?;
        let token = state
            .tokens
            .iter_mut()
            .find(|token| token.token_hash == token_hash)
            .ok_or(RepositoryError::NotFound)?;
        if !token.is_active(now) {
            return Ok(QuotaReservation::Inactive);
        }
        if token.uploads_remaining == 0 {
            return Ok(QuotaReservation::Exhausted);
        }
        token.uploads_remaining -= 1;
        Ok(QuotaReservation::Reserved {
            remaining: token.uploads_remaining,
        })
    }

    fn release(&self, token_hash: &str) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let token = state
            .tokens
            .iter_mut()
            .find(|token| token.token_hash == token_hash)
            .ok_or(RepositoryError::NotFound)?;
        token.uploads_remaining = token.uploads_remaining.saturating_add(1);
        Ok(())
    }
}

impl JobRepository for MemoryReviewStore {
    fn enqueue(&self, job: ReprocessingJob) -> Result<EnqueueOutcome, RepositoryError> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .jobs
            .iter()
            .find(|existing| existing.target == job.target && existing.status.is_active())
        {
            return Ok(EnqueueOutcome::Coalesced(existing.clone()));
        }
        state.jobs.push(job.clone());
        Ok(EnqueueOutcome::Queued(job))
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<ReprocessingJob>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.jobs.iter().find(|job| &job.id == id).cloned())
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ReprocessingJob>, RepositoryError> {
        let state = self.lock()?;
        let mut jobs: Vec<ReprocessingJob> = state
            .jobs
            .iter()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    fn claim(&self, id: &JobId, now: DateTime<Utc>) -> Result<ReprocessingJob, RepositoryError> {
        let mut state = self.lock()?;
        let index = state
            .jobs
            .iter()
            .position(|job| &job.id == id)
            .ok_or(RepositoryError::NotFound)?;
        let target = state.jobs[index].target.clone();
        if state
            .jobs
            .iter()
            .any(|job| job.target == target && job.status == JobStatus::Running)
        {
            return Err(RepositoryError::Conflict);
        }

        let job = &mut state.jobs[index];
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.finished_at = None;
        job.attempts += 1;
        Ok(job.clone())
    }

    fn finish(&self, job: ReprocessingJob) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let stored = state
            .jobs
            .iter_mut()
            .find(|existing| existing.id == job.id)
            .ok_or(RepositoryError::NotFound)?;
        *stored = job;
        Ok(())
    }
}

/// Blob store keeping uploaded bytes in memory. Writes can be made to fail for testing.
#[derive(Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        Ok(self.lock()?.get(key).cloned())
    }

    pub fn count(&self) -> Result<usize, RepositoryError> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, RepositoryError> {
        self.blobs
            .lock()
            .map_err(|_| RepositoryError::Unavailable("blob store mutex poisoned".to_string()))
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("blob store rejected write".to_string()));
        }
        self.lock()?.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Fixed organization and client directory.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    organizations: HashMap<OrganizationId, OrganizationSettings>,
    clients: HashMap<ClientId, (OrganizationId, String)>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organization(
        mut self,
        organization_id: OrganizationId,
        settings: OrganizationSettings,
    ) -> Self {
        self.organizations.insert(organization_id, settings);
        self
    }

    pub fn with_client(
        mut self,
        organization_id: OrganizationId,
        client_id: ClientId,
        name: impl Into<String>,
    ) -> Self {
        self.clients.insert(client_id, (organization_id, name.into()));
        self
    }
}

impl OrganizationDirectory for StaticDirectory {
    fn settings(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<OrganizationSettings, RepositoryError> {
        self.organizations
            .get(organization_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    fn client_name(&self, client_id: &ClientId) -> Result<Option<String>, RepositoryError> {
        Ok(self.clients.get(client_id).map(|(_, name)| name.clone()))
    }

    fn organization_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<OrganizationId>, RepositoryError> {
        Ok(self
            .clients
            .get(client_id)
            .map(|(organization_id, _)| organization_id.clone()))
    }
}
