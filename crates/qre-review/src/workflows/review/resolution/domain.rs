use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::super::domain::{EvidenceRequestId, FindingId, ResolutionId};
use super::super::findings::domain::{EntityRef, FindingStatus};

/// Fixed set of dispositions a resolution can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    VerifiedNoChange,
    FieldUpdated,
    ClientEvidenceRequested,
    Dismissed,
    Escalated,
}

impl ResolutionType {
    pub const fn label(self) -> &'static str {
        match self {
            ResolutionType::VerifiedNoChange => "verified_no_change",
            ResolutionType::FieldUpdated => "field_updated",
            ResolutionType::ClientEvidenceRequested => "client_evidence_requested",
            ResolutionType::Dismissed => "dismissed",
            ResolutionType::Escalated => "escalated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub before: Value,
    pub after: Value,
}

/// Immutable audit entry. Never edited or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: ResolutionId,
    pub finding_id: FindingId,
    pub resolution_type: ResolutionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_changes: BTreeMap<String, FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_request_id: Option<EvidenceRequestId>,
    pub status_from: FindingStatus,
    pub status_to: FindingStatus,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Field values to write back to the entity alongside a `field_updated` resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPatch {
    pub entity: EntityRef,
    pub fields: BTreeMap<String, Value>,
}

/// Everything a resolution writes, applied by the repository as one unit.
///
/// The repository must reject the commit with `RepositoryError::Conflict` when the stored
/// finding status no longer equals `resolution.status_from` or the idempotency key has
/// already been recorded for the finding.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionCommit {
    pub resolution: Resolution,
    pub entity_patch: Option<EntityPatch>,
    pub at: DateTime<Utc>,
}
