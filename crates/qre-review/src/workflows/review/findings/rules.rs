use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::super::settings::OrganizationSettings;
use super::domain::{
    AuthorityReference, EntitySnapshot, EntityType, EstimatedImpact, FindingDomain, Severity,
};

/// Share of contract research payments that counts toward QRE.
const CONTRACT_RESEARCH_SHARE: f64 = 0.65;

/// Why a rule fired, with the data needed to render and size the finding.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTrigger {
    pub severity: Severity,
    pub title: String,
    pub trigger_evidence: BTreeMap<String, Value>,
    pub estimated_impact: EstimatedImpact,
    pub recommended_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("rule {rule_id} requires field '{field}' on {entity_id}")]
    MissingField {
        rule_id: &'static str,
        entity_id: String,
        field: &'static str,
    },
    #[error("rule {rule_id} expected field '{field}' to be {expected}")]
    InvalidField {
        rule_id: &'static str,
        field: &'static str,
        expected: &'static str,
    },
}

/// A compliance check evaluated against one entity snapshot.
pub trait ComplianceRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn domain(&self) -> FindingDomain;
    fn entity_type(&self) -> EntityType;
    fn authority_references(&self) -> Vec<AuthorityReference>;
    fn evaluate(
        &self,
        snapshot: &EntitySnapshot,
        settings: &OrganizationSettings,
    ) -> Result<Option<RuleTrigger>, RuleError>;
}

/// Registry of rules keyed by id.
#[derive(Clone)]
pub struct RuleCatalog {
    rules: Vec<Arc<dyn ComplianceRule>>,
}

impl RuleCatalog {
    pub fn new(rules: Vec<Arc<dyn ComplianceRule>>) -> Self {
        Self { rules }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(WageOutlierRule),
            Arc::new(AllocationBoundsRule),
            Arc::new(LargeTransactionRule),
            Arc::new(VendorContractRule),
        ])
    }

    pub fn get(&self, rule_id: &str) -> Option<Arc<dyn ComplianceRule>> {
        self.rules.iter().find(|rule| rule.id() == rule_id).cloned()
    }

    pub fn for_entity(&self, entity_type: EntityType) -> Vec<Arc<dyn ComplianceRule>> {
        self.rules
            .iter()
            .filter(|rule| rule.entity_type() == entity_type)
            .cloned()
            .collect()
    }
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for RuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|rule| rule.id()))
            .finish()
    }
}

fn required_number(
    snapshot: &EntitySnapshot,
    rule_id: &'static str,
    field: &'static str,
) -> Result<f64, RuleError> {
    match snapshot.fields.get(field) {
        None | Some(Value::Null) => Err(RuleError::MissingField {
            rule_id,
            entity_id: snapshot.entity.entity_id.clone(),
            field,
        }),
        Some(value) => value.as_f64().ok_or(RuleError::InvalidField {
            rule_id,
            field,
            expected: "a number",
        }),
    }
}

fn optional_number(
    snapshot: &EntitySnapshot,
    rule_id: &'static str,
    field: &'static str,
) -> Result<Option<f64>, RuleError> {
    match snapshot.fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or(RuleError::InvalidField {
            rule_id,
            field,
            expected: "a number",
        }),
    }
}

fn optional_flag(
    snapshot: &EntitySnapshot,
    rule_id: &'static str,
    field: &'static str,
) -> Result<bool, RuleError> {
    match snapshot.fields.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(value) => value.as_bool().ok_or(RuleError::InvalidField {
            rule_id,
            field,
            expected: "a boolean",
        }),
    }
}

fn authority(citation: &str, title: &str) -> AuthorityReference {
    AuthorityReference {
        citation: citation.to_string(),
        title: title.to_string(),
    }
}

/// Qualified wages above the organization's outlier threshold without support on file.
pub struct WageOutlierRule;

impl ComplianceRule for WageOutlierRule {
    fn id(&self) -> &'static str {
        "wage_outlier"
    }

    fn domain(&self) -> FindingDomain {
        FindingDomain::Wages
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Employee
    }

    fn authority_references(&self) -> Vec<AuthorityReference> {
        vec![
            authority("IRC §41(b)(2)(D)", "Wages for qualified services"),
            authority("Treas. Reg. §1.41-2(d)", "Qualified services"),
        ]
    }

    fn evaluate(
        &self,
        snapshot: &EntitySnapshot,
        settings: &OrganizationSettings,
    ) -> Result<Option<RuleTrigger>, RuleError> {
        let wages = required_number(snapshot, self.id(), "qualified_wages")?;
        let threshold = settings.wage_outlier_threshold;
        if wages <= threshold || snapshot.has_evidence_for(self.id()) {
            return Ok(None);
        }

        let allocation = optional_number(snapshot, self.id(), "rd_allocation_pct")?
            .unwrap_or(100.0)
            .clamp(0.0, 100.0);
        let excess = wages - threshold;
        let qre_at_risk = excess * allocation / 100.0;
        let severity = if excess > threshold * 0.5 {
            Severity::High
        } else {
            Severity::Medium
        };

        let mut trigger_evidence = BTreeMap::new();
        trigger_evidence.insert("qualified_wages".to_string(), json!(wages));
        trigger_evidence.insert("wage_outlier_threshold".to_string(), json!(threshold));
        trigger_evidence.insert("rd_allocation_pct".to_string(), json!(allocation));

        Ok(Some(RuleTrigger {
            severity,
            title: format!(
                "Qualified wages {wages:.0} exceed outlier threshold {threshold:.0}"
            ),
            trigger_evidence,
            estimated_impact: EstimatedImpact::from_qre(qre_at_risk, settings.credit_rate),
            recommended_actions: vec![
                "Request compensation support (W-2 and offer letter)".to_string(),
                "Confirm the employee's qualified-services role".to_string(),
            ],
        }))
    }
}

/// R&D allocation percentage outside the organization's accepted bounds.
pub struct AllocationBoundsRule;

impl ComplianceRule for AllocationBoundsRule {
    fn id(&self) -> &'static str {
        "allocation_out_of_bounds"
    }

    fn domain(&self) -> FindingDomain {
        FindingDomain::Allocation
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Employee
    }

    fn authority_references(&self) -> Vec<AuthorityReference> {
        vec![authority(
            "Treas. Reg. §1.41-2(c)",
            "Substantially all of the services",
        )]
    }

    fn evaluate(
        &self,
        snapshot: &EntitySnapshot,
        settings: &OrganizationSettings,
    ) -> Result<Option<RuleTrigger>, RuleError> {
        let Some(pct) = optional_number(snapshot, self.id(), "rd_allocation_pct")? else {
            return Ok(None);
        };
        if settings.allocation_within_bounds(pct) || snapshot.has_evidence_for(self.id()) {
            return Ok(None);
        }

        let wages = optional_number(snapshot, self.id(), "qualified_wages")?.unwrap_or(0.0);
        let distance = if pct < settings.allocation_min_pct {
            settings.allocation_min_pct - pct
        } else {
            pct - settings.allocation_max_pct
        };
        let severity = if distance <= 5.0 {
            Severity::Low
        } else {
            Severity::Medium
        };

        let mut trigger_evidence = BTreeMap::new();
        trigger_evidence.insert("rd_allocation_pct".to_string(), json!(pct));
        trigger_evidence.insert(
            "allocation_min_pct".to_string(),
            json!(settings.allocation_min_pct),
        );
        trigger_evidence.insert(
            "allocation_max_pct".to_string(),
            json!(settings.allocation_max_pct),
        );

        Ok(Some(RuleTrigger {
            severity,
            title: format!("R&D allocation {pct:.1}% outside accepted bounds"),
            trigger_evidence,
            estimated_impact: EstimatedImpact::from_qre(
                wages * pct.clamp(0.0, 100.0) / 100.0,
                settings.credit_rate,
            ),
            recommended_actions: vec![
                "Collect time-tracking records supporting the allocation".to_string(),
            ],
        }))
    }
}

/// Single expense above the large-transaction threshold with no supporting document.
pub struct LargeTransactionRule;

impl ComplianceRule for LargeTransactionRule {
    fn id(&self) -> &'static str {
        "large_tx_unsupported"
    }

    fn domain(&self) -> FindingDomain {
        FindingDomain::Supplies
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Expense
    }

    fn authority_references(&self) -> Vec<AuthorityReference> {
        vec![authority("IRC §41(b)(2)(C)", "Supplies")]
    }

    fn evaluate(
        &self,
        snapshot: &EntitySnapshot,
        settings: &OrganizationSettings,
    ) -> Result<Option<RuleTrigger>, RuleError> {
        let amount = required_number(snapshot, self.id(), "amount")?;
        let threshold = settings.large_tx_threshold;
        if amount <= threshold || snapshot.has_evidence_for(self.id()) {
            return Ok(None);
        }

        let severity = if amount >= threshold * 2.0 {
            Severity::High
        } else {
            Severity::Medium
        };

        let mut trigger_evidence = BTreeMap::new();
        trigger_evidence.insert("amount".to_string(), json!(amount));
        trigger_evidence.insert("large_tx_threshold".to_string(), json!(threshold));
        if let Some(vendor) = snapshot.fields.get("vendor") {
            trigger_evidence.insert("vendor".to_string(), vendor.clone());
        }

        Ok(Some(RuleTrigger {
            severity,
            title: format!("Expense of {amount:.0} lacks supporting documentation"),
            trigger_evidence,
            estimated_impact: EstimatedImpact::from_qre(amount, settings.credit_rate),
            recommended_actions: vec!["Request invoice and proof of payment".to_string()],
        }))
    }
}

/// Contract research spend without an executed contract on file.
pub struct VendorContractRule;

impl ComplianceRule for VendorContractRule {
    fn id(&self) -> &'static str {
        "vendor_contract_missing"
    }

    fn domain(&self) -> FindingDomain {
        FindingDomain::Contractors
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Contractor
    }

    fn authority_references(&self) -> Vec<AuthorityReference> {
        vec![
            authority("IRC §41(b)(3)", "Contract research expenses"),
            authority("Treas. Reg. §1.41-2(e)", "Contract research expenses"),
        ]
    }

    fn evaluate(
        &self,
        snapshot: &EntitySnapshot,
        settings: &OrganizationSettings,
    ) -> Result<Option<RuleTrigger>, RuleError> {
        let amount = required_number(snapshot, self.id(), "amount")?;
        let contract_on_file = optional_flag(snapshot, self.id(), "contract_on_file")?;
        if amount <= 0.0 || contract_on_file || snapshot.has_evidence_for(self.id()) {
            return Ok(None);
        }

        let qre_at_risk = amount * CONTRACT_RESEARCH_SHARE;
        let severity = if amount > settings.large_tx_threshold {
            Severity::High
        } else {
            Severity::Medium
        };

        let mut trigger_evidence = BTreeMap::new();
        trigger_evidence.insert("amount".to_string(), json!(amount));
        trigger_evidence.insert("contract_on_file".to_string(), json!(false));

        Ok(Some(RuleTrigger {
            severity,
            title: format!("Contractor spend of {amount:.0} has no contract on file"),
            trigger_evidence,
            estimated_impact: EstimatedImpact::from_qre(qre_at_risk, settings.credit_rate),
            recommended_actions: vec![
                "Request the signed contract or statement of work".to_string(),
                "Confirm who retains substantial rights to the research".to_string(),
            ],
        }))
    }
}
