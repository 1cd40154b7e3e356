use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::super::domain::{ClientId, EvidenceFileId, FindingId, ReviewScope};

/// Ordered so that `High` sorts above `Medium` above `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const fn label(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Lifecycle of a finding. The four resolved/dismissed states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Open,
    InReview,
    ResolvedVerified,
    ResolvedFixed,
    ResolvedEscalated,
    Dismissed,
}

impl FindingStatus {
    pub const fn label(self) -> &'static str {
        match self {
            FindingStatus::Open => "open",
            FindingStatus::InReview => "in_review",
            FindingStatus::ResolvedVerified => "resolved_verified",
            FindingStatus::ResolvedFixed => "resolved_fixed",
            FindingStatus::ResolvedEscalated => "resolved_escalated",
            FindingStatus::Dismissed => "dismissed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, FindingStatus::Open | FindingStatus::InReview)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingDomain {
    Wages,
    Contractors,
    Supplies,
    Allocation,
}

impl FindingDomain {
    pub const fn label(self) -> &'static str {
        match self {
            FindingDomain::Wages => "wages",
            FindingDomain::Contractors => "contractors",
            FindingDomain::Supplies => "supplies",
            FindingDomain::Allocation => "allocation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Employee,
    Contractor,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatedImpact {
    pub qre_at_risk: f64,
    pub credit_at_risk: f64,
}

impl EstimatedImpact {
    pub fn from_qre(qre_at_risk: f64, credit_rate: f64) -> Self {
        let qre_at_risk = qre_at_risk.max(0.0);
        Self {
            qre_at_risk,
            credit_at_risk: (qre_at_risk * credit_rate).max(0.0),
        }
    }
}

/// Citation attached for display; owned by the authority library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityReference {
    pub citation: String,
    pub title: String,
}

/// Evidence already linked to a finding on the snapshot's entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedEvidence {
    pub file_id: EvidenceFileId,
    pub finding_id: FindingId,
    pub rule_id: String,
    pub original_filename: String,
}

/// Point-in-time view of an entity's fields that rules evaluate against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity: EntityRef,
    pub client_id: ClientId,
    pub tax_year: i32,
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub linked_evidence: Vec<LinkedEvidence>,
}

impl EntitySnapshot {
    pub fn new(entity: EntityRef, scope: &ReviewScope) -> Self {
        Self {
            entity,
            client_id: scope.client_id.clone(),
            tax_year: scope.tax_year,
            fields: BTreeMap::new(),
            linked_evidence: Vec::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn has_evidence_for(&self, rule_id: &str) -> bool {
        self.linked_evidence
            .iter()
            .any(|evidence| evidence.rule_id == rule_id)
    }
}

/// A flagged potential compliance issue produced by rule evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    pub client_id: ClientId,
    pub tax_year: i32,
    pub rule_id: String,
    pub domain: FindingDomain,
    pub severity: Severity,
    pub status: FindingStatus,
    pub title: String,
    pub entity: EntityRef,
    pub trigger_evidence: BTreeMap<String, Value>,
    pub estimated_impact: EstimatedImpact,
    pub authority_references: Vec<AuthorityReference>,
    pub recommended_actions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Finding {
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// List filter; every populated field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingFilter {
    #[serde(default)]
    pub status: Option<FindingStatus>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub domain: Option<FindingDomain>,
    #[serde(default)]
    pub client_id: Option<ClientId>,
    #[serde(default)]
    pub tax_year: Option<i32>,
}

impl FindingFilter {
    pub fn for_scope(scope: &ReviewScope) -> Self {
        Self {
            client_id: Some(scope.client_id.clone()),
            tax_year: Some(scope.tax_year),
            ..Self::default()
        }
    }

    pub fn matches(&self, finding: &Finding) -> bool {
        self.status.map_or(true, |status| finding.status == status)
            && self.severity.map_or(true, |severity| finding.severity == severity)
            && self.domain.map_or(true, |domain| finding.domain == domain)
            && self
                .client_id
                .as_ref()
                .map_or(true, |client_id| &finding.client_id == client_id)
            && self.tax_year.map_or(true, |year| finding.tax_year == year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_high_first_when_reversed() {
        let mut severities = vec![Severity::Low, Severity::High, Severity::Medium];
        severities.sort_by(|a, b| b.cmp(a));
        assert_eq!(
            severities,
            vec![Severity::High, Severity::Medium, Severity::Low]
        );
    }

    #[test]
    fn only_open_and_in_review_are_non_terminal() {
        assert!(!FindingStatus::Open.is_terminal());
        assert!(!FindingStatus::InReview.is_terminal());
        assert!(FindingStatus::ResolvedVerified.is_terminal());
        assert!(FindingStatus::ResolvedFixed.is_terminal());
        assert!(FindingStatus::ResolvedEscalated.is_terminal());
        assert!(FindingStatus::Dismissed.is_terminal());
    }

    #[test]
    fn estimated_impact_never_negative() {
        let impact = EstimatedImpact::from_qre(-10.0, 0.065);
        assert_eq!(impact.qre_at_risk, 0.0);
        assert_eq!(impact.credit_at_risk, 0.0);
    }
}
