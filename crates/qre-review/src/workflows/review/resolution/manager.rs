use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::super::domain::{EvidenceRequestId, FindingId, ResolutionId, ReviewerAction};
use super::super::error::ReviewError;
use super::super::findings::domain::{Finding, FindingFilter, FindingStatus};
use super::super::repository::{FindingRepository, RepositoryError};
use super::super::settings::OrganizationDirectory;
use super::domain::{EntityPatch, FieldChange, Resolution, ResolutionCommit};
use super::gating::requires_senior_escalation;
use super::transitions::{plan_transition, ResolutionAction};

/// The finding after an action, the resolution that recorded it, and whether the resolution
/// was replayed from an earlier submission with the same idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionReceipt {
    pub finding: Finding,
    pub resolution: Resolution,
    pub replayed: bool,
}

#[derive(Default)]
struct Draft {
    note: Option<String>,
    reason_code: Option<String>,
    field_changes: BTreeMap<String, FieldChange>,
    evidence_request_id: Option<EvidenceRequestId>,
    entity_patch: Option<EntityPatch>,
}

/// Sole writer of finding status. Every change appends an immutable resolution.
pub struct ResolutionManager {
    repository: Arc<dyn FindingRepository>,
    directory: Arc<dyn OrganizationDirectory>,
}

impl ResolutionManager {
    pub fn new(
        repository: Arc<dyn FindingRepository>,
        directory: Arc<dyn OrganizationDirectory>,
    ) -> Self {
        Self {
            repository,
            directory,
        }
    }

    /// Confirm the finding needs no change.
    pub fn verify(
        &self,
        finding_id: &FindingId,
        note: Option<String>,
        action: &ReviewerAction,
    ) -> Result<ResolutionReceipt, ReviewError> {
        let draft = Draft {
            note: normalize(note),
            ..Draft::default()
        };
        self.apply(finding_id, ResolutionAction::Verify, draft, action)
    }

    /// Correct entity fields. Only values that differ from the current snapshot are recorded;
    /// an empty diff is rejected.
    pub fn update_fields(
        &self,
        finding_id: &FindingId,
        field_changes: BTreeMap<String, Value>,
        note: Option<String>,
        action: &ReviewerAction,
    ) -> Result<ResolutionReceipt, ReviewError> {
        if let Some(receipt) = self.replay(finding_id, action)? {
            return Ok(receipt);
        }

        let finding = self.load(finding_id)?;
        let snapshot = self
            .repository
            .snapshot(&finding.entity)?
            .ok_or_else(|| ReviewError::not_found("entity", &finding.entity.entity_id))?;

        let diff: BTreeMap<String, FieldChange> = field_changes
            .into_iter()
            .filter_map(|(field, after)| {
                let before = snapshot.fields.get(&field).cloned().unwrap_or(Value::Null);
                (before != after).then_some((field, FieldChange { before, after }))
            })
            .collect();

        if diff.is_empty() {
            return Err(ReviewError::validation(
                "field_changes must change at least one value on the entity",
            ));
        }

        let patch = EntityPatch {
            entity: finding.entity.clone(),
            fields: diff
                .iter()
                .map(|(field, change)| (field.clone(), change.after.clone()))
                .collect(),
        };
        let draft = Draft {
            note: normalize(note),
            field_changes: diff,
            entity_patch: Some(patch),
            ..Draft::default()
        };
        self.apply(finding_id, ResolutionAction::UpdateFields, draft, action)
    }

    /// Dismiss the finding. Both a reason code and a note are mandatory.
    pub fn dismiss(
        &self,
        finding_id: &FindingId,
        reason_code: &str,
        note: &str,
        action: &ReviewerAction,
    ) -> Result<ResolutionReceipt, ReviewError> {
        let reason_code = normalize(Some(reason_code.to_string()))
            .ok_or_else(|| ReviewError::validation("reason_code is required to dismiss"))?;
        let note = normalize(Some(note.to_string()))
            .ok_or_else(|| ReviewError::validation("note is required to dismiss"))?;

        let draft = Draft {
            note: Some(note),
            reason_code: Some(reason_code),
            ..Draft::default()
        };
        self.apply(finding_id, ResolutionAction::Dismiss, draft, action)
    }

    /// Route the finding to the senior-reviewer worklist.
    pub fn escalate(
        &self,
        finding_id: &FindingId,
        note: Option<String>,
        action: &ReviewerAction,
    ) -> Result<ResolutionReceipt, ReviewError> {
        let draft = Draft {
            note: normalize(note),
            ..Draft::default()
        };
        self.apply(finding_id, ResolutionAction::Escalate, draft, action)
    }

    /// Record that client documents were requested; the finding stays in review. Callers go
    /// through `EvidenceRequestService`, which checks the request exists and links it back.
    pub(crate) fn request_evidence(
        &self,
        finding_id: &FindingId,
        evidence_request_id: &EvidenceRequestId,
        action: &ReviewerAction,
    ) -> Result<ResolutionReceipt, ReviewError> {
        let draft = Draft {
            evidence_request_id: Some(evidence_request_id.clone()),
            ..Draft::default()
        };
        self.apply(finding_id, ResolutionAction::RequestEvidence, draft, action)
    }

    /// Findings escalated for senior review.
    pub fn senior_worklist(&self, filter: &FindingFilter) -> Result<Vec<Finding>, ReviewError> {
        let filter = FindingFilter {
            status: Some(FindingStatus::ResolvedEscalated),
            ..filter.clone()
        };
        Ok(self.repository.list_findings(&filter)?)
    }

    pub(crate) fn system_resolve(
        &self,
        finding_id: &FindingId,
        note: String,
        action: &ReviewerAction,
    ) -> Result<ResolutionReceipt, ReviewError> {
        let draft = Draft {
            note: Some(note),
            ..Draft::default()
        };
        self.apply(finding_id, ResolutionAction::SystemResolve, draft, action)
    }

    pub(crate) fn system_reopen(
        &self,
        finding_id: &FindingId,
        revised_trigger: &BTreeMap<String, Value>,
        note: String,
        action: &ReviewerAction,
    ) -> Result<ResolutionReceipt, ReviewError> {
        if let Some(receipt) = self.replay(finding_id, action)? {
            return Ok(receipt);
        }
        let finding = self.load(finding_id)?;
        let mut field_changes = BTreeMap::new();
        for (key, after) in revised_trigger {
            let before = finding
                .trigger_evidence
                .get(key)
                .cloned()
                .unwrap_or(Value::Null);
            if &before != after {
                field_changes.insert(
                    key.clone(),
                    FieldChange {
                        before,
                        after: after.clone(),
                    },
                );
            }
        }
        let draft = Draft {
            note: Some(note),
            field_changes,
            ..Draft::default()
        };
        self.apply(finding_id, ResolutionAction::SystemReopen, draft, action)
    }

    pub fn history(&self, finding_id: &FindingId) -> Result<Vec<Resolution>, ReviewError> {
        Ok(self.repository.resolutions(finding_id)?)
    }

    fn apply(
        &self,
        finding_id: &FindingId,
        kind: ResolutionAction,
        draft: Draft,
        action: &ReviewerAction,
    ) -> Result<ResolutionReceipt, ReviewError> {
        if let Some(receipt) = self.replay(finding_id, action)? {
            return Ok(receipt);
        }
        if action.resolved_by.trim().is_empty() {
            return Err(ReviewError::validation("resolved_by is required"));
        }

        let finding = self.load(finding_id)?;
        let status_to = match plan_transition(kind, finding.status) {
            Ok(status) => status,
            Err(err) => {
                warn!(
                    finding_id = %finding_id,
                    action = kind.label(),
                    status = finding.status.label(),
                    "rejected finding transition"
                );
                return Err(err);
            }
        };
        if kind.closes_without_escalation() {
            self.ensure_escalation_not_required(&finding, kind)?;
        }

        let resolution = Resolution {
            id: ResolutionId::generate(),
            finding_id: finding_id.clone(),
            resolution_type: kind.resolution_type(),
            note: draft.note,
            reason_code: draft.reason_code,
            field_changes: draft.field_changes,
            evidence_request_id: draft.evidence_request_id,
            status_from: finding.status,
            status_to,
            resolved_by: action.resolved_by.clone(),
            resolved_at: action.at,
            idempotency_key: action.idempotency_key.clone(),
        };

        let commit = ResolutionCommit {
            resolution: resolution.clone(),
            entity_patch: draft.entity_patch,
            at: action.at,
        };

        match self.repository.commit_resolution(commit) {
            Ok(updated) => {
                info!(
                    finding_id = %finding_id,
                    resolution = resolution.resolution_type.label(),
                    from = resolution.status_from.label(),
                    to = resolution.status_to.label(),
                    resolved_by = %resolution.resolved_by,
                    "recorded resolution"
                );
                Ok(ResolutionReceipt {
                    finding: updated,
                    resolution,
                    replayed: false,
                })
            }
            Err(RepositoryError::Conflict) => {
                // Lost a race: either a duplicate submission won, or the status moved.
                if let Some(receipt) = self.replay(finding_id, action)? {
                    return Ok(receipt);
                }
                let latest = self.load(finding_id)?;
                plan_transition(kind, latest.status)?;
                Err(RepositoryError::Conflict.into())
            }
            Err(other) => Err(other.into()),
        }
    }

    fn replay(
        &self,
        finding_id: &FindingId,
        action: &ReviewerAction,
    ) -> Result<Option<ResolutionReceipt>, ReviewError> {
        let Some(key) = action.idempotency_key.as_deref() else {
            return Ok(None);
        };
        let Some(resolution) = self.repository.resolution_by_key(finding_id, key)? else {
            return Ok(None);
        };
        let finding = self.load(finding_id)?;
        Ok(Some(ResolutionReceipt {
            finding,
            resolution,
            replayed: true,
        }))
    }

    /// Organizations that gate finalization send high-exposure findings to a senior reviewer;
    /// those findings can only leave review through escalation.
    fn ensure_escalation_not_required(
        &self,
        finding: &Finding,
        kind: ResolutionAction,
    ) -> Result<(), ReviewError> {
        let settings = self.directory.settings_for_client(&finding.client_id)?;
        if settings.block_finalize_with_open_high_findings
            && requires_senior_escalation(finding, &settings)
        {
            warn!(
                finding_id = %finding.id,
                action = kind.label(),
                credit_at_risk = finding.estimated_impact.credit_at_risk,
                "finding requires senior escalation"
            );
            return Err(ReviewError::EscalationRequired {
                finding_id: finding.id.to_string(),
            });
        }
        Ok(())
    }

    fn load(&self, finding_id: &FindingId) -> Result<Finding, ReviewError> {
        self.repository
            .fetch_finding(finding_id)?
            .ok_or_else(|| ReviewError::not_found("finding", finding_id))
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
