use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::super::domain::{FindingId, ReviewScope};
use super::super::error::ReviewError;
use super::super::repository::FindingRepository;
use super::super::resolution::domain::Resolution;
use super::super::settings::OrganizationSettings;
use super::domain::{EntitySnapshot, Finding, FindingFilter, FindingStatus};
use super::rules::{ComplianceRule, RuleCatalog, RuleTrigger};

/// A finding together with its audit trail, oldest resolution first.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FindingDetail {
    pub finding: Finding,
    pub resolutions: Vec<Resolution>,
}

/// Evaluates the rule catalog against entity snapshots and owns finding creation.
pub struct FindingsEngine {
    repository: Arc<dyn FindingRepository>,
    catalog: Arc<RuleCatalog>,
}

impl FindingsEngine {
    pub fn new(repository: Arc<dyn FindingRepository>, catalog: Arc<RuleCatalog>) -> Self {
        Self {
            repository,
            catalog,
        }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// Run every rule for the snapshot's entity type, creating findings for new triggers and
    /// refreshing open findings whose trigger data moved. Returns the findings that triggered.
    pub fn evaluate(
        &self,
        scope: &ReviewScope,
        snapshot: &EntitySnapshot,
        settings: &OrganizationSettings,
        now: DateTime<Utc>,
    ) -> Result<Vec<Finding>, ReviewError> {
        let mut triggered = Vec::new();
        for rule in self.catalog.for_entity(snapshot.entity.entity_type) {
            let Some(trigger) = Self::run_rule(rule.as_ref(), snapshot, settings)? else {
                continue;
            };

            let existing = self.repository.find_for_rule(
                &scope.client_id,
                scope.tax_year,
                rule.id(),
                &snapshot.entity,
            )?;

            let finding = match existing {
                Some(finding) if finding.is_open() => self.refresh(finding, &trigger, now)?,
                Some(finding) => finding,
                None => self.create(scope, snapshot, rule.as_ref(), trigger, now)?,
            };
            triggered.push(finding);
        }

        debug!(
            entity_id = %snapshot.entity.entity_id,
            triggered = triggered.len(),
            "evaluated compliance rules"
        );
        Ok(triggered)
    }

    /// Re-run the single rule that produced `finding` against a fresh snapshot.
    pub fn reevaluate(
        &self,
        finding: &Finding,
        snapshot: &EntitySnapshot,
        settings: &OrganizationSettings,
    ) -> Result<Option<RuleTrigger>, ReviewError> {
        let rule = self.catalog.get(&finding.rule_id).ok_or_else(|| {
            ReviewError::validation(format!("unknown rule '{}'", finding.rule_id))
        })?;
        Self::run_rule(rule.as_ref(), snapshot, settings)
    }

    /// Write new rule output onto an existing finding without touching its status.
    /// Returns the refreshed finding.
    pub fn refresh(
        &self,
        mut finding: Finding,
        trigger: &RuleTrigger,
        now: DateTime<Utc>,
    ) -> Result<Finding, ReviewError> {
        if Self::trigger_matches(&finding, trigger) {
            return Ok(finding);
        }
        finding.severity = trigger.severity;
        finding.title = trigger.title.clone();
        finding.trigger_evidence = trigger.trigger_evidence.clone();
        finding.estimated_impact = trigger.estimated_impact;
        finding.recommended_actions = trigger.recommended_actions.clone();
        finding.updated_at = now;
        self.repository.refresh_finding(finding.clone())?;
        Ok(finding)
    }

    pub fn list(&self, filter: &FindingFilter) -> Result<Vec<Finding>, ReviewError> {
        Ok(self.repository.list_findings(filter)?)
    }

    pub fn get(&self, id: &FindingId) -> Result<Finding, ReviewError> {
        self.repository
            .fetch_finding(id)?
            .ok_or_else(|| ReviewError::not_found("finding", id))
    }

    pub fn detail(&self, id: &FindingId) -> Result<FindingDetail, ReviewError> {
        let finding = self.get(id)?;
        let resolutions = self.repository.resolutions(id)?;
        Ok(FindingDetail {
            finding,
            resolutions,
        })
    }

    fn run_rule(
        rule: &dyn ComplianceRule,
        snapshot: &EntitySnapshot,
        settings: &OrganizationSettings,
    ) -> Result<Option<RuleTrigger>, ReviewError> {
        Ok(rule.evaluate(snapshot, settings)?)
    }

    fn trigger_matches(finding: &Finding, trigger: &RuleTrigger) -> bool {
        finding.severity == trigger.severity
            && finding.trigger_evidence == trigger.trigger_evidence
            && finding.estimated_impact == trigger.estimated_impact
    }

    fn create(
        &self,
        scope: &ReviewScope,
        snapshot: &EntitySnapshot,
        rule: &dyn ComplianceRule,
        trigger: RuleTrigger,
        now: DateTime<Utc>,
    ) -> Result<Finding, ReviewError> {
        let finding = Finding {
            id: FindingId::generate(),
            client_id: scope.client_id.clone(),
            tax_year: scope.tax_year,
            rule_id: rule.id().to_string(),
            domain: rule.domain(),
            severity: trigger.severity,
            status: FindingStatus::Open,
            title: trigger.title,
            entity: snapshot.entity.clone(),
            trigger_evidence: trigger.trigger_evidence,
            estimated_impact: trigger.estimated_impact,
            authority_references: rule.authority_references(),
            recommended_actions: trigger.recommended_actions,
            created_at: now,
            updated_at: now,
        };
        let stored = self.repository.insert_finding(finding)?;
        info!(
            finding_id = %stored.id,
            rule_id = %stored.rule_id,
            severity = stored.severity.label(),
            "opened finding"
        );
        Ok(stored)
    }
}
