use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::super::domain::{
    EvidenceFileId, EvidenceRequestId, FindingId, ReviewScope, ReviewerAction,
};
use super::super::error::ReviewError;
use super::super::findings::domain::Finding;
use super::super::repository::{EvidenceRepository, FindingRepository, RepositoryError};
use super::super::resolution::transitions::plan_transition;
use super::super::resolution::{ResolutionAction, ResolutionManager, ResolutionReceipt};
use super::super::settings::{OrganizationDirectory, OrganizationSettings};
use super::super::upload::token::{token_expiry, IssuedToken, TokenIssuer};
use super::domain::{
    CompletionOutcome, EvidenceFile, EvidenceFileStatus, EvidenceRequest, EvidenceRequestFilter,
    EvidenceRequestStatus, NewEvidenceRequest, NO_FILES_BLOCKER,
};
use super::matching::{missing_required_items, status_after_upload};
use super::templates::{default_title, email_draft, infer_request_type, requested_items};

const STATUS_UPDATE_ATTEMPTS: usize = 3;

/// A request that has just been sent, with the upload link credential for the email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentRequest {
    pub request: EvidenceRequest,
    pub upload_token: IssuedToken,
}

/// Owns the evidence request lifecycle and the files received against it.
pub struct EvidenceRequestService {
    repository: Arc<dyn EvidenceRepository>,
    findings: Arc<dyn FindingRepository>,
    resolutions: Arc<ResolutionManager>,
    tokens: Arc<TokenIssuer>,
    directory: Arc<dyn OrganizationDirectory>,
}

impl EvidenceRequestService {
    pub fn new(
        repository: Arc<dyn EvidenceRepository>,
        findings: Arc<dyn FindingRepository>,
        resolutions: Arc<ResolutionManager>,
        tokens: Arc<TokenIssuer>,
        directory: Arc<dyn OrganizationDirectory>,
    ) -> Self {
        Self {
            repository,
            findings,
            resolutions,
            tokens,
            directory,
        }
    }

    /// Draft a request, derive its checklist and email, and move linked findings into review.
    pub fn create(
        &self,
        scope: &ReviewScope,
        input: NewEvidenceRequest,
        action: &ReviewerAction,
    ) -> Result<EvidenceRequest, ReviewError> {
        let reason = input.reason.trim().to_string();
        if reason.is_empty() {
            return Err(ReviewError::validation("reason is required"));
        }

        let linked = self.load_linked_findings(scope, &input.linked_finding_ids)?;
        let request_type = match input.request_type {
            Some(request_type) => request_type,
            None => linked
                .first()
                .map(|finding| infer_request_type(&finding.rule_id))
                .ok_or_else(|| {
                    ReviewError::validation("request_type is required when no findings are linked")
                })?,
        };

        let items = requested_items(request_type);
        let title = input
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| default_title(request_type, scope.tax_year));
        let client_name = self
            .directory
            .client_name(&scope.client_id)?
            .unwrap_or_else(|| scope.client_id.to_string());
        let draft = email_draft(&client_name, &title, &reason, &items, input.due_date);

        let request = EvidenceRequest {
            id: EvidenceRequestId::generate(),
            client_id: scope.client_id.clone(),
            tax_year: scope.tax_year,
            request_type,
            status: EvidenceRequestStatus::Draft,
            title,
            reason,
            requested_items: items,
            email_draft: draft,
            email_sent_at: None,
            linked_finding_ids: linked.iter().map(|finding| finding.id.clone()).collect(),
            due_date: input.due_date,
            created_at: action.at,
            updated_at: action.at,
        };
        let stored = self.repository.insert_request(request)?;

        for finding in &linked {
            let linked_action = ReviewerAction {
                idempotency_key: Some(format!("evidence-request:{}", stored.id)),
                ..action.clone()
            };
            if let Err(err) = self
                .resolutions
                .request_evidence(&finding.id, &stored.id, &linked_action)
            {
                self.abandon_draft(&stored, action.at);
                return Err(err);
            }
        }

        info!(
            request_id = %stored.id,
            request_type = stored.request_type.label(),
            linked_findings = stored.linked_finding_ids.len(),
            "drafted evidence request"
        );
        Ok(stored)
    }

    /// Put an open finding into review under an existing request and add it to the request's
    /// linked findings so request-level reprocessing reaches it.
    pub fn request_evidence(
        &self,
        request_id: &EvidenceRequestId,
        finding_id: &FindingId,
        action: &ReviewerAction,
    ) -> Result<ResolutionReceipt, ReviewError> {
        let request = self.get(request_id)?;
        if request.status.is_terminal() {
            return Err(ReviewError::InvalidRequestState {
                action: "link a finding to",
                from: request.status.label(),
            });
        }
        let finding = self
            .findings
            .fetch_finding(finding_id)?
            .ok_or_else(|| ReviewError::not_found("finding", finding_id))?;
        if finding.client_id != request.client_id || finding.tax_year != request.tax_year {
            return Err(ReviewError::validation(format!(
                "finding {finding_id} is outside the request's client and tax year"
            )));
        }

        let receipt = self
            .resolutions
            .request_evidence(finding_id, request_id, action)?;
        self.attach_finding(request_id, finding_id, action.at)?;
        Ok(receipt)
    }

    /// Mark the email as sent and issue the first upload link.
    pub fn mark_sent(
        &self,
        scope: &ReviewScope,
        id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<SentRequest, ReviewError> {
        let mut request = self.get(id)?;
        if request.status != EvidenceRequestStatus::Draft {
            return Err(ReviewError::InvalidRequestState {
                action: "send",
                from: request.status.label(),
            });
        }

        let settings = self.settings_for_request(scope, &request)?;
        token_expiry(&settings, now)?;
        request.status = EvidenceRequestStatus::Sent;
        request.email_sent_at = Some(now);
        request.updated_at = now;
        self.save(request.clone(), EvidenceRequestStatus::Draft, "send")?;

        let upload_token = self.tokens.regenerate(id, &settings, now)?;
        info!(request_id = %id, "sent evidence request");
        Ok(SentRequest {
            request,
            upload_token,
        })
    }

    pub fn get(&self, id: &EvidenceRequestId) -> Result<EvidenceRequest, ReviewError> {
        self.repository
            .fetch_request(id)?
            .ok_or_else(|| ReviewError::not_found("evidence request", id))
    }

    pub fn list(
        &self,
        filter: &EvidenceRequestFilter,
    ) -> Result<Vec<EvidenceRequest>, ReviewError> {
        Ok(self.repository.list_requests(filter)?)
    }

    pub fn files(&self, id: &EvidenceRequestId) -> Result<Vec<EvidenceFile>, ReviewError> {
        Ok(self.repository.files_for_request(id)?)
    }

    pub fn file(&self, id: &EvidenceFileId) -> Result<EvidenceFile, ReviewError> {
        self.repository
            .fetch_file(id)?
            .ok_or_else(|| ReviewError::not_found("evidence file", id))
    }

    /// The client opened a valid upload link for the first time.
    pub(crate) fn note_link_opened(
        &self,
        request: &EvidenceRequest,
        now: DateTime<Utc>,
    ) -> Result<(), ReviewError> {
        if request.status != EvidenceRequestStatus::Sent {
            return Ok(());
        }
        let mut updated = request.clone();
        updated.status = EvidenceRequestStatus::AwaitingUpload;
        updated.updated_at = now;
        match self
            .repository
            .update_request(updated, EvidenceRequestStatus::Sent)
        {
            // Another caller already advanced the request.
            Ok(()) | Err(RepositoryError::Conflict) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    /// Record files that arrived through an upload link.
    pub(crate) fn append_files(&self, files: Vec<EvidenceFile>) -> Result<(), ReviewError> {
        if files.is_empty() {
            return Ok(());
        }
        Ok(self.repository.append_files(files)?)
    }

    /// Advance the request toward `received` based on the files now on hand.
    pub(crate) fn refresh_status(
        &self,
        request_id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<EvidenceRequest, ReviewError> {
        for _ in 0..STATUS_UPDATE_ATTEMPTS {
            let request = self.get(request_id)?;
            let files = self.repository.files_for_request(request_id)?;
            let next = status_after_upload(&request, &files);
            if next == request.status {
                return Ok(request);
            }

            let expected = request.status;
            let mut updated = request;
            updated.status = next;
            updated.updated_at = now;
            match self.repository.update_request(updated.clone(), expected) {
                Ok(()) => {
                    info!(
                        request_id = %request_id,
                        from = expected.label(),
                        to = next.label(),
                        "evidence request advanced"
                    );
                    return Ok(updated);
                }
                Err(RepositoryError::Conflict) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(RepositoryError::Conflict.into())
    }

    /// Close the request once every required item has a file. Otherwise report what is
    /// missing and leave the status untouched.
    pub fn complete(
        &self,
        id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, ReviewError> {
        let request = self.get(id)?;
        if request.status.is_terminal() || request.status == EvidenceRequestStatus::Draft {
            return Err(ReviewError::InvalidRequestState {
                action: "complete",
                from: request.status.label(),
            });
        }

        let files = self.repository.files_for_request(id)?;
        let mut blockers = Vec::new();
        if !files
            .iter()
            .any(|file| file.status != EvidenceFileStatus::Rejected)
        {
            blockers.push(NO_FILES_BLOCKER.to_string());
        }
        blockers.extend(missing_required_items(&request, &files));
        if !blockers.is_empty() {
            info!(request_id = %id, blockers = blockers.len(), "evidence request not complete");
            return Ok(CompletionOutcome::Blocked { blockers });
        }

        let expected = request.status;
        let mut updated = request;
        updated.status = EvidenceRequestStatus::Completed;
        updated.updated_at = now;
        self.save(updated.clone(), expected, "complete")?;
        self.tokens.revoke(id, now)?;
        info!(request_id = %id, "completed evidence request");
        Ok(CompletionOutcome::Completed { request: updated })
    }

    pub fn cancel(
        &self,
        id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<EvidenceRequest, ReviewError> {
        let request = self.get(id)?;
        if request.status.is_terminal() {
            return Err(ReviewError::InvalidRequestState {
                action: "cancel",
                from: request.status.label(),
            });
        }
        let expected = request.status;
        let mut updated = request;
        updated.status = EvidenceRequestStatus::Cancelled;
        updated.updated_at = now;
        self.save(updated.clone(), expected, "cancel")?;
        self.tokens.revoke(id, now)?;
        info!(request_id = %id, "cancelled evidence request");
        Ok(updated)
    }

    /// Attach an uploaded file to the one finding it supports. Public callers use
    /// `ReviewDesk::link_evidence_file`, which also queues reprocessing.
    pub(crate) fn link_file(
        &self,
        file_id: &EvidenceFileId,
        finding_id: &FindingId,
    ) -> Result<EvidenceFile, ReviewError> {
        let mut file = self.file(file_id)?;
        let finding = self
            .findings
            .fetch_finding(finding_id)?
            .ok_or_else(|| ReviewError::not_found("finding", finding_id))?;
        let request = self.get(&file.request_id)?;
        if finding.client_id != request.client_id || finding.tax_year != request.tax_year {
            return Err(ReviewError::validation(
                "finding and evidence file belong to different engagements",
            ));
        }

        match (file.status, file.finding_id.as_ref()) {
            (EvidenceFileStatus::Uploaded, _) => {}
            (EvidenceFileStatus::Linked, Some(current)) if current == finding_id => {
                return Ok(file);
            }
            (EvidenceFileStatus::Linked, _) => {
                return Err(ReviewError::validation(
                    "file is already linked to another finding",
                ));
            }
            (EvidenceFileStatus::Processed, _) | (EvidenceFileStatus::Rejected, _) => {
                return Err(ReviewError::validation(format!(
                    "file cannot be linked once {}",
                    match file.status {
                        EvidenceFileStatus::Processed => "processed",
                        _ => "rejected",
                    }
                )));
            }
        }

        file.status = EvidenceFileStatus::Linked;
        file.finding_id = Some(finding_id.clone());
        self.repository.update_file(file.clone())?;
        info!(file_id = %file_id, finding_id = %finding_id, "linked evidence file");
        Ok(file)
    }

    /// Reviewer rejects a received file; it no longer satisfies any item.
    pub fn reject_file(
        &self,
        file_id: &EvidenceFileId,
        reason: &str,
    ) -> Result<EvidenceFile, ReviewError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ReviewError::validation("a rejection reason is required"));
        }
        let mut file = self.file(file_id)?;
        if !matches!(
            file.status,
            EvidenceFileStatus::Uploaded | EvidenceFileStatus::Linked
        ) {
            return Err(ReviewError::validation(
                "only uploaded or linked files can be rejected",
            ));
        }
        file.status = EvidenceFileStatus::Rejected;
        file.finding_id = None;
        file.rejection_reason = Some(reason.to_string());
        self.repository.update_file(file.clone())?;
        warn!(file_id = %file_id, "rejected evidence file");
        Ok(file)
    }

    /// Linked files for the given findings.
    pub(crate) fn linked_files(
        &self,
        finding_ids: &[FindingId],
    ) -> Result<Vec<EvidenceFile>, ReviewError> {
        Ok(self
            .repository
            .files_for_findings(finding_ids)?
            .into_iter()
            .filter(|file| {
                matches!(
                    file.status,
                    EvidenceFileStatus::Linked | EvidenceFileStatus::Processed
                )
            })
            .collect())
    }

    pub(crate) fn mark_processed(&self, files: &[EvidenceFile]) -> Result<(), ReviewError> {
        for file in files
            .iter()
            .filter(|file| file.status == EvidenceFileStatus::Linked)
        {
            let mut processed = file.clone();
            processed.status = EvidenceFileStatus::Processed;
            self.repository.update_file(processed)?;
        }
        Ok(())
    }

    pub fn revoke_token(
        &self,
        id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<bool, ReviewError> {
        self.get(id)?;
        self.tokens.revoke(id, now)
    }

    /// Replace the upload link. The previous link stops working immediately.
    pub fn regenerate_token(
        &self,
        scope: &ReviewScope,
        id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, ReviewError> {
        let request = self.get(id)?;
        if !request.status.accepts_uploads() {
            return Err(ReviewError::InvalidRequestState {
                action: "issue an upload link for",
                from: request.status.label(),
            });
        }
        let settings = self.settings_for_request(scope, &request)?;
        self.tokens.regenerate(id, &settings, now)
    }

    /// Settings of the organization owning the request, once the caller's scope is shown to
    /// cover it.
    fn settings_for_request(
        &self,
        scope: &ReviewScope,
        request: &EvidenceRequest,
    ) -> Result<OrganizationSettings, ReviewError> {
        let owner = self.directory.organization_for_client(&request.client_id)?;
        let outside = request.client_id != scope.client_id
            || request.tax_year != scope.tax_year
            || owner.is_some_and(|owner| owner != scope.organization_id);
        if outside {
            return Err(ReviewError::validation(format!(
                "evidence request {} is outside the requested scope",
                request.id
            )));
        }
        Ok(self.directory.settings_for_client(&request.client_id)?)
    }

    pub(crate) fn directory(&self) -> &Arc<dyn OrganizationDirectory> {
        &self.directory
    }

    fn attach_finding(
        &self,
        request_id: &EvidenceRequestId,
        finding_id: &FindingId,
        now: DateTime<Utc>,
    ) -> Result<(), ReviewError> {
        for _ in 0..STATUS_UPDATE_ATTEMPTS {
            let request = self.get(request_id)?;
            if request.linked_finding_ids.contains(finding_id) {
                return Ok(());
            }
            let expected = request.status;
            let mut updated = request;
            updated.linked_finding_ids.push(finding_id.clone());
            updated.updated_at = now;
            match self.repository.update_request(updated, expected) {
                Ok(()) => {
                    info!(request_id = %request_id, finding_id = %finding_id, "linked finding to evidence request");
                    return Ok(());
                }
                Err(RepositoryError::Conflict) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(RepositoryError::Conflict.into())
    }

    /// A draft whose findings could not all be moved into review is cancelled rather than left
    /// live with a partial link set.
    fn abandon_draft(&self, request: &EvidenceRequest, now: DateTime<Utc>) {
        let mut cancelled = request.clone();
        cancelled.status = EvidenceRequestStatus::Cancelled;
        cancelled.updated_at = now;
        if let Err(err) = self
            .repository
            .update_request(cancelled, EvidenceRequestStatus::Draft)
        {
            warn!(request_id = %request.id, error = %err, "could not cancel abandoned evidence request");
        } else {
            warn!(request_id = %request.id, "cancelled evidence request after a linked finding changed");
        }
    }

    fn load_linked_findings(
        &self,
        scope: &ReviewScope,
        ids: &[FindingId],
    ) -> Result<Vec<Finding>, ReviewError> {
        let mut findings: Vec<Finding> = Vec::with_capacity(ids.len());
        for id in ids {
            if findings.iter().any(|finding| &finding.id == id) {
                continue;
            }
            let finding = self
                .findings
                .fetch_finding(id)?
                .ok_or_else(|| ReviewError::not_found("finding", id))?;
            if finding.client_id != scope.client_id || finding.tax_year != scope.tax_year {
                return Err(ReviewError::validation(format!(
                    "finding {id} is outside the requested client and tax year"
                )));
            }
            plan_transition(ResolutionAction::RequestEvidence, finding.status)?;
            findings.push(finding);
        }
        Ok(findings)
    }

    fn save(
        &self,
        request: EvidenceRequest,
        expected: EvidenceRequestStatus,
        action: &'static str,
    ) -> Result<(), ReviewError> {
        match self.repository.update_request(request, expected) {
            Ok(()) => Ok(()),
            Err(RepositoryError::Conflict) => Err(ReviewError::InvalidRequestState {
                action,
                from: "changed concurrently",
            }),
            Err(other) => Err(other.into()),
        }
    }
}
