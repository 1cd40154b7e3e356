use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::super::domain::{ClientId, FindingId, JobId, ReviewerAction};
use super::super::error::ReviewError;
use super::super::evidence::domain::EvidenceFile;
use super::super::evidence::EvidenceRequestService;
use super::super::findings::domain::{Finding, FindingStatus, LinkedEvidence};
use super::super::findings::FindingsEngine;
use super::super::repository::{FindingRepository, JobRepository, RepositoryError};
use super::super::resolution::{Resolution, ResolutionManager};
use super::super::settings::{OrganizationDirectory, OrganizationSettings};
use super::domain::{
    EnqueueOutcome, JobFilter, JobStatus, JobSummary, ReprocessTarget, ReprocessingJob,
};

const AUTO_RESOLVE_NOTE: &str = "rule no longer triggers after reprocessing";
const REOPEN_NOTE: &str = "rule triggers again on revised data";

/// Queues and runs re-evaluation of findings after new evidence arrives.
pub struct ReprocessingScheduler {
    jobs: Arc<dyn JobRepository>,
    findings: Arc<dyn FindingRepository>,
    engine: Arc<FindingsEngine>,
    resolutions: Arc<ResolutionManager>,
    evidence: Arc<EvidenceRequestService>,
    directory: Arc<dyn OrganizationDirectory>,
}

impl ReprocessingScheduler {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        findings: Arc<dyn FindingRepository>,
        engine: Arc<FindingsEngine>,
        resolutions: Arc<ResolutionManager>,
        evidence: Arc<EvidenceRequestService>,
        directory: Arc<dyn OrganizationDirectory>,
    ) -> Self {
        Self {
            jobs,
            findings,
            engine,
            resolutions,
            evidence,
            directory,
        }
    }

    /// Queue a job for `target`, or hand back the job already queued or running for it.
    pub fn enqueue(
        &self,
        target: ReprocessTarget,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, ReviewError> {
        self.ensure_target_exists(&target)?;
        let outcome = self.jobs.enqueue(ReprocessingJob::queued(target, now))?;
        match &outcome {
            EnqueueOutcome::Queued(job) => {
                info!(job_id = %job.id, job_target = %job.target.label(), "queued reprocessing job");
            }
            EnqueueOutcome::Coalesced(job) => {
                info!(
                    job_id = %job.id,
                    job_target = %job.target.label(),
                    status = job.status.label(),
                    "coalesced reprocessing request into existing job"
                );
            }
        }
        Ok(outcome)
    }

    pub fn get(&self, id: &JobId) -> Result<ReprocessingJob, ReviewError> {
        self.jobs
            .fetch_job(id)?
            .ok_or_else(|| ReviewError::not_found("reprocessing job", id))
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<ReprocessingJob>, ReviewError> {
        Ok(self.jobs.list_jobs(filter)?)
    }

    /// Run the oldest queued job, if any.
    pub fn run_next(&self, now: DateTime<Utc>) -> Result<Option<ReprocessingJob>, ReviewError> {
        let queued = self.jobs.list_jobs(&JobFilter {
            target: None,
            status: Some(JobStatus::Queued),
        })?;
        for job in queued {
            match self.run(&job.id, now) {
                Ok(finished) => return Ok(Some(finished)),
                // The target is busy; leave this job queued and try the next one.
                Err(ReviewError::ConcurrencyConflict { .. }) => continue,
                Err(ReviewError::JobExecution { .. }) => return self.get(&job.id).map(Some),
                Err(other) => return Err(other),
            }
        }
        Ok(None)
    }

    /// Claim and execute a job. Completed and failed jobs may be run again; the result depends
    /// only on current state, so a repeat run reports the same summary.
    pub fn run(&self, id: &JobId, now: DateTime<Utc>) -> Result<ReprocessingJob, ReviewError> {
        let job = self.get(id)?;
        let mut claimed = match self.jobs.claim(id, now) {
            Ok(claimed) => claimed,
            Err(RepositoryError::Conflict) => {
                warn!(job_id = %id, job_target = %job.target.label(), "reprocessing target busy");
                return Err(ReviewError::ConcurrencyConflict {
                    target: job.target.label(),
                });
            }
            Err(other) => return Err(other.into()),
        };
        info!(job_id = %id, attempt = claimed.attempts, "started reprocessing job");

        match self.execute(&claimed, now) {
            Ok(summary) => {
                claimed.status = JobStatus::Completed;
                claimed.job_summary = Some(summary);
                claimed.error = None;
                claimed.finished_at = Some(now);
                self.jobs.finish(claimed.clone())?;
                info!(
                    job_id = %id,
                    rules_run = summary.rules_run,
                    findings_updated = summary.findings_updated,
                    findings_auto_resolved = summary.findings_auto_resolved,
                    "completed reprocessing job"
                );
                Ok(claimed)
            }
            Err(failure) => {
                let message = failure.to_string();
                claimed.status = JobStatus::Failed;
                claimed.error = Some(message.clone());
                claimed.finished_at = Some(now);
                self.jobs.finish(claimed)?;
                error!(job_id = %id, error = %message, "reprocessing job failed");
                Err(ReviewError::JobExecution {
                    job_id: id.to_string(),
                    message,
                })
            }
        }
    }

    fn execute(&self, job: &ReprocessingJob, now: DateTime<Utc>) -> Result<JobSummary, ReviewError> {
        let findings = self.findings_for(&job.target)?;
        let finding_ids: Vec<FindingId> = findings.iter().map(|finding| finding.id.clone()).collect();
        let files = self.evidence.linked_files(&finding_ids)?;
        let mut settings_by_client: BTreeMap<ClientId, OrganizationSettings> = BTreeMap::new();
        let mut summary = JobSummary::default();

        for finding in findings {
            if !settings_by_client.contains_key(&finding.client_id) {
                let settings = self.directory.settings_for_client(&finding.client_id)?;
                settings_by_client.insert(finding.client_id.clone(), settings);
            }
            let settings = settings_by_client
                .get(&finding.client_id)
                .cloned()
                .unwrap_or_default();

            let mut snapshot = self
                .findings
                .snapshot(&finding.entity)?
                .ok_or_else(|| ReviewError::not_found("entity", &finding.entity.entity_id))?;
            attach_linked_files(&mut snapshot.linked_evidence, &finding, &files);

            summary.rules_run += 1;
            let trigger = self.engine.reevaluate(&finding, &snapshot, &settings)?;
            let history = self.resolutions.history(&finding.id)?;
            let resolve_prefix = system_key_prefix(&job.id, &finding.id, "resolve");

            match trigger {
                None => {
                    let resolved = if finding.status.is_terminal() {
                        resolved_by(&history, &resolve_prefix, finding.status)
                    } else {
                        let action = ReviewerAction::system(
                            format!("{resolve_prefix}:{}", history.len()),
                            now,
                        );
                        let receipt = self.resolutions.system_resolve(
                            &finding.id,
                            AUTO_RESOLVE_NOTE.to_string(),
                            &action,
                        )?;
                        receipt.resolution.status_to == FindingStatus::ResolvedVerified
                            && receipt.finding.status == FindingStatus::ResolvedVerified
                    };
                    if resolved {
                        summary.findings_auto_resolved += 1;
                    }
                }
                Some(trigger) => match finding.status {
                    FindingStatus::ResolvedVerified | FindingStatus::ResolvedFixed => {
                        let action = ReviewerAction::system(
                            format!(
                                "{}:{}",
                                system_key_prefix(&job.id, &finding.id, "reopen"),
                                history.len()
                            ),
                            now,
                        );
                        let receipt = self.resolutions.system_reopen(
                            &finding.id,
                            &trigger.trigger_evidence,
                            REOPEN_NOTE.to_string(),
                            &action,
                        )?;
                        self.engine.refresh(receipt.finding, &trigger, now)?;
                        summary.findings_updated += 1;
                    }
                    status if !status.is_terminal() => {
                        self.engine.refresh(finding, &trigger, now)?;
                        summary.findings_updated += 1;
                    }
                    // Escalated and dismissed findings stay with their reviewer.
                    _ => {}
                },
            }
        }

        self.evidence.mark_processed(&files)?;
        Ok(summary)
    }

    fn findings_for(&self, target: &ReprocessTarget) -> Result<Vec<Finding>, ReviewError> {
        let ids: Vec<FindingId> = match target {
            ReprocessTarget::Finding { finding_id } => vec![finding_id.clone()],
            ReprocessTarget::EvidenceRequest { request_id } => {
                let request = self.evidence.get(request_id)?;
                let mut ids = request.linked_finding_ids;
                for file in self.evidence.files(request_id)? {
                    if let Some(finding_id) = file.finding_id {
                        if !ids.contains(&finding_id) {
                            ids.push(finding_id);
                        }
                    }
                }
                ids
            }
        };

        ids.iter()
            .map(|id| {
                self.findings
                    .fetch_finding(id)?
                    .ok_or_else(|| ReviewError::not_found("finding", id))
            })
            .collect()
    }

    fn ensure_target_exists(&self, target: &ReprocessTarget) -> Result<(), ReviewError> {
        match target {
            ReprocessTarget::Finding { finding_id } => {
                self.engine.get(finding_id)?;
            }
            ReprocessTarget::EvidenceRequest { request_id } => {
                self.evidence.get(request_id)?;
            }
        }
        Ok(())
    }
}

/// Idempotency keys for system resolutions carry the step and the history length they were
/// written against, so a rerun after a reopen writes a fresh entry instead of replaying a stale one.
fn system_key_prefix(job_id: &JobId, finding_id: &FindingId, step: &str) -> String {
    format!("reprocess:{job_id}:{finding_id}:{step}")
}

/// Whether the finding currently rests on an auto-resolution written by this job.
fn resolved_by(history: &[Resolution], resolve_prefix: &str, status: FindingStatus) -> bool {
    status == FindingStatus::ResolvedVerified
        && history.last().is_some_and(|latest| {
            latest.status_to == FindingStatus::ResolvedVerified
                && latest
                    .idempotency_key
                    .as_deref()
                    .is_some_and(|key| key.starts_with(resolve_prefix))
        })
}

fn attach_linked_files(linked: &mut Vec<LinkedEvidence>, finding: &Finding, files: &[EvidenceFile]) {
    for file in files
        .iter()
        .filter(|file| file.finding_id.as_ref() == Some(&finding.id))
    {
        if linked.iter().any(|existing| existing.file_id == file.id) {
            continue;
        }
        linked.push(LinkedEvidence {
            file_id: file.id.clone(),
            finding_id: finding.id.clone(),
            rule_id: finding.rule_id.clone(),
            original_filename: file.original_filename.clone(),
        });
    }
}
