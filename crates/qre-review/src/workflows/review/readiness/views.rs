use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{FindingId, ReviewScope};
use super::super::findings::domain::{FindingDomain, FindingStatus, Severity};
use super::scorer::ReadinessInputs;

/// Readiness dimensions owned by other parts of the practice platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExternalSignals {
    pub data_completeness: f64,
    pub questionnaire_completeness: f64,
    pub gaps_resolved: f64,
    pub ai_evaluation_freshness: f64,
    pub study_decisions_locked: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerKind {
    SeniorReviewRequired,
    FailedReprocessing,
    StalledReprocessing,
}

impl BlockerKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SeniorReviewRequired => "Senior review required",
            Self::FailedReprocessing => "Reprocessing failed",
            Self::StalledReprocessing => "Reprocessing stalled",
        }
    }
}

/// A hard gate: the study cannot finalize while any remain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockerView {
    pub kind: BlockerKind,
    pub kind_label: &'static str,
    pub subject_id: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    OverdueEvidenceRequest,
    LowEvidenceCoverage,
    StaleAiEvaluation,
}

impl RiskKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::OverdueEvidenceRequest => "Evidence request overdue",
            Self::LowEvidenceCoverage => "Low evidence coverage",
            Self::StaleAiEvaluation => "AI evaluation is stale",
        }
    }
}

/// A soft warning; does not block finalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskFlagView {
    pub kind: RiskKind,
    pub kind_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub detail: String,
}

/// One open finding on the reviewer worklist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextAction {
    pub finding_id: FindingId,
    pub rule_id: String,
    pub title: String,
    pub domain: FindingDomain,
    pub severity: Severity,
    pub severity_label: &'static str,
    pub status: FindingStatus,
    pub status_label: &'static str,
    pub qre_at_risk: f64,
    pub credit_at_risk: f64,
    pub requires_senior_review: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadinessReport {
    pub scope: ReviewScope,
    pub score: f64,
    pub inputs: ReadinessInputs,
    pub can_finalize: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_blockers: Vec<BlockerView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risk_flags: Vec<RiskFlagView>,
    pub next_actions: Vec<NextAction>,
    pub assessed_at: DateTime<Utc>,
}
