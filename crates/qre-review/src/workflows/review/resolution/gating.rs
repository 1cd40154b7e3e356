use serde::Serialize;

use super::super::domain::FindingId;
use super::super::findings::domain::{Finding, FindingStatus, Severity};
use super::super::settings::OrganizationSettings;

/// Whether the finding's estimated exposure crosses the senior-review thresholds.
pub fn requires_senior_escalation(finding: &Finding, settings: &OrganizationSettings) -> bool {
    finding.estimated_impact.credit_at_risk > settings.senior_required_credit_at_risk
        || finding.estimated_impact.qre_at_risk > settings.senior_required_qre_at_risk
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizationBlocker {
    pub finding_id: FindingId,
    pub reason: String,
}

/// Findings that stand between the study and finalization: any finding over the senior-review
/// thresholds that was neither escalated nor cleared by the rule itself, and open high-severity
/// findings. Empty when the organization does not gate finalization.
pub fn finalization_blockers(
    findings: &[Finding],
    settings: &OrganizationSettings,
) -> Vec<FinalizationBlocker> {
    if !settings.block_finalize_with_open_high_findings {
        return Vec::new();
    }

    findings
        .iter()
        .filter_map(|finding| {
            if requires_senior_escalation(finding, settings) && awaits_escalation(finding.status) {
                Some(FinalizationBlocker {
                    finding_id: finding.id.clone(),
                    reason: format!(
                        "{} requires senior escalation ({:.0} credit at risk)",
                        finding.title, finding.estimated_impact.credit_at_risk
                    ),
                })
            } else if finding.is_open() && finding.severity == Severity::High {
                Some(FinalizationBlocker {
                    finding_id: finding.id.clone(),
                    reason: format!("{} is an open high-severity finding", finding.title),
                })
            } else {
                None
            }
        })
        .collect()
}

/// `ResolvedVerified` on a high-exposure finding only comes from reprocessing once the rule
/// stops triggering; reviewers must escalate.
fn awaits_escalation(status: FindingStatus) -> bool {
    !matches!(
        status,
        FindingStatus::ResolvedEscalated | FindingStatus::ResolvedVerified
    )
}
