use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::domain::{EvidenceFileId, FindingId, ReviewScope};
use super::error::ReviewError;
use super::evidence::{EvidenceFile, EvidenceRequestService};
use super::findings::{EntityRef, Finding, FindingsEngine, RuleCatalog};
use super::memory::{MemoryBlobStore, MemoryReviewStore, StaticDirectory};
use super::readiness::ReadinessService;
use super::repository::{
    BlobStore, EvidenceRepository, FindingRepository, JobRepository, TokenRepository,
};
use super::reprocessing::{ReprocessTarget, ReprocessingJob, ReprocessingScheduler};
use super::resolution::ResolutionManager;
use super::settings::OrganizationDirectory;
use super::upload::{TokenIssuer, UploadTokenGateway};

/// Storage and collaborator seams the review services are built on.
#[derive(Clone)]
pub struct ReviewBackends {
    pub findings: Arc<dyn FindingRepository>,
    pub evidence: Arc<dyn EvidenceRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub blobs: Arc<dyn BlobStore>,
    pub directory: Arc<dyn OrganizationDirectory>,
}

impl ReviewBackends {
    pub fn in_memory(
        store: &MemoryReviewStore,
        blobs: &MemoryBlobStore,
        directory: StaticDirectory,
    ) -> Self {
        Self {
            findings: Arc::new(store.clone()),
            evidence: Arc::new(store.clone()),
            tokens: Arc::new(store.clone()),
            jobs: Arc::new(store.clone()),
            blobs: Arc::new(blobs.clone()),
            directory: Arc::new(directory),
        }
    }
}

/// A file linked to a finding, with the reprocessing job that will re-evaluate it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedEvidenceFile {
    pub file: EvidenceFile,
    pub job: ReprocessingJob,
}

/// Wires every review service over one set of backends.
pub struct ReviewDesk {
    findings: Arc<dyn FindingRepository>,
    directory: Arc<dyn OrganizationDirectory>,
    engine: Arc<FindingsEngine>,
    resolutions: Arc<ResolutionManager>,
    evidence: Arc<EvidenceRequestService>,
    uploads: Arc<UploadTokenGateway>,
    reprocessing: Arc<ReprocessingScheduler>,
    readiness: Arc<ReadinessService>,
    stall_ceiling: Duration,
}

impl ReviewDesk {
    pub fn new(backends: ReviewBackends, catalog: RuleCatalog, stall_ceiling: Duration) -> Self {
        let ReviewBackends {
            findings,
            evidence,
            tokens,
            jobs,
            blobs,
            directory,
        } = backends;

        let engine = Arc::new(FindingsEngine::new(findings.clone(), Arc::new(catalog)));
        let resolutions = Arc::new(ResolutionManager::new(findings.clone(), directory.clone()));
        let issuer = Arc::new(TokenIssuer::new(tokens));
        let evidence = Arc::new(EvidenceRequestService::new(
            evidence,
            findings.clone(),
            resolutions.clone(),
            issuer.clone(),
            directory.clone(),
        ));
        let uploads = Arc::new(UploadTokenGateway::new(issuer, evidence.clone(), blobs));
        let reprocessing = Arc::new(ReprocessingScheduler::new(
            jobs,
            findings.clone(),
            engine.clone(),
            resolutions.clone(),
            evidence.clone(),
            directory.clone(),
        ));
        let readiness = Arc::new(ReadinessService::new(
            findings.clone(),
            evidence.clone(),
            reprocessing.clone(),
            directory.clone(),
            stall_ceiling,
        ));

        Self {
            findings,
            directory,
            engine,
            resolutions,
            evidence,
            uploads,
            reprocessing,
            readiness,
            stall_ceiling,
        }
    }

    /// Evaluate the stored snapshot of `entity` under the scope's organization settings.
    pub fn evaluate_entity(
        &self,
        scope: &ReviewScope,
        entity: &EntityRef,
        now: DateTime<Utc>,
    ) -> Result<Vec<Finding>, ReviewError> {
        let snapshot = self
            .findings
            .snapshot(entity)?
            .ok_or_else(|| ReviewError::not_found("entity", &entity.entity_id))?;
        if snapshot.client_id != scope.client_id || snapshot.tax_year != scope.tax_year {
            return Err(ReviewError::validation(
                "entity snapshot is outside the requested client and tax year",
            ));
        }
        let settings = self.directory.settings(&scope.organization_id)?;
        self.engine.evaluate(scope, &snapshot, &settings, now)
    }

    /// Link an uploaded file to a finding and queue re-evaluation of the file's request. A job
    /// already pending for that request absorbs the new evidence.
    pub fn link_evidence_file(
        &self,
        file_id: &EvidenceFileId,
        finding_id: &FindingId,
        now: DateTime<Utc>,
    ) -> Result<LinkedEvidenceFile, ReviewError> {
        let file = self.evidence.link_file(file_id, finding_id)?;
        let job = self
            .reprocessing
            .enqueue(
                ReprocessTarget::EvidenceRequest {
                    request_id: file.request_id.clone(),
                },
                now,
            )?
            .into_job();
        info!(file_id = %file.id, job_id = %job.id, "queued reprocessing for linked evidence");
        Ok(LinkedEvidenceFile { file, job })
    }

    pub fn findings(&self) -> &FindingsEngine {
        &self.engine
    }

    pub fn resolutions(&self) -> &ResolutionManager {
        &self.resolutions
    }

    pub fn evidence(&self) -> &EvidenceRequestService {
        &self.evidence
    }

    pub fn uploads(&self) -> &UploadTokenGateway {
        &self.uploads
    }

    pub fn reprocessing(&self) -> &ReprocessingScheduler {
        &self.reprocessing
    }

    pub fn readiness(&self) -> &ReadinessService {
        &self.readiness
    }

    /// Age after which a queued or running job is reported as stalled.
    pub fn stall_ceiling(&self) -> Duration {
        self.stall_ceiling
    }
}
