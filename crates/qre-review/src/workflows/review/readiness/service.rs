use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use super::super::domain::ReviewScope;
use super::super::error::ReviewError;
use super::super::evidence::domain::{
    EvidenceRequest, EvidenceRequestFilter, EvidenceRequestStatus,
};
use super::super::evidence::matching::coverage_pct;
use super::super::evidence::EvidenceRequestService;
use super::super::findings::domain::{Finding, FindingFilter};
use super::super::repository::FindingRepository;
use super::super::reprocessing::{
    JobFilter, JobHealth, ReprocessTarget, ReprocessingJob, ReprocessingScheduler,
};
use super::super::resolution::{finalization_blockers, requires_senior_escalation};
use super::super::settings::OrganizationDirectory;
use super::scorer::{score, ReadinessInputs};
use super::views::{
    BlockerKind, BlockerView, ExternalSignals, NextAction, ReadinessReport, RiskFlagView,
    RiskKind,
};

const LOW_COVERAGE_PCT: f64 = 50.0;
const STALE_AI_PCT: f64 = 50.0;

/// Derives a study's readiness from current findings, requests, and jobs. Nothing is stored.
pub struct ReadinessService {
    findings: Arc<dyn FindingRepository>,
    evidence: Arc<EvidenceRequestService>,
    scheduler: Arc<ReprocessingScheduler>,
    directory: Arc<dyn OrganizationDirectory>,
    stall_ceiling: Duration,
}

impl ReadinessService {
    pub fn new(
        findings: Arc<dyn FindingRepository>,
        evidence: Arc<EvidenceRequestService>,
        scheduler: Arc<ReprocessingScheduler>,
        directory: Arc<dyn OrganizationDirectory>,
        stall_ceiling: Duration,
    ) -> Self {
        Self {
            findings,
            evidence,
            scheduler,
            directory,
            stall_ceiling,
        }
    }

    pub fn assess(
        &self,
        scope: &ReviewScope,
        external: ExternalSignals,
        now: DateTime<Utc>,
    ) -> Result<ReadinessReport, ReviewError> {
        let settings = self.directory.settings(&scope.organization_id)?;
        let findings = self.findings.list_findings(&FindingFilter::for_scope(scope))?;
        let requests: Vec<_> = self
            .evidence
            .list(&EvidenceRequestFilter {
                client_id: Some(scope.client_id.clone()),
                tax_year: Some(scope.tax_year),
                status: None,
            })?
            .into_iter()
            .filter(|request| request.status != EvidenceRequestStatus::Cancelled)
            .collect();

        let mut coverage_total = 0.0;
        for request in &requests {
            let files = self.evidence.files(&request.id)?;
            coverage_total += coverage_pct(request, &files);
        }
        let evidence_coverage = if requests.is_empty() {
            100.0
        } else {
            coverage_total / requests.len() as f64
        };

        let resolved = findings.iter().filter(|finding| !finding.is_open()).count();
        let automated_review_resolved = if findings.is_empty() {
            100.0
        } else {
            resolved as f64 / findings.len() as f64 * 100.0
        };

        let inputs = ReadinessInputs {
            data_completeness: external.data_completeness,
            questionnaire_completeness: external.questionnaire_completeness,
            gaps_resolved: external.gaps_resolved,
            evidence_coverage,
            ai_evaluation_freshness: external.ai_evaluation_freshness,
            automated_review_resolved,
            study_decisions_locked: external.study_decisions_locked,
        };
        inputs.validate()?;

        let mut top_blockers: Vec<BlockerView> = finalization_blockers(&findings, &settings)
            .into_iter()
            .map(|blocker| BlockerView {
                kind: BlockerKind::SeniorReviewRequired,
                kind_label: BlockerKind::SeniorReviewRequired.label(),
                subject_id: blocker.finding_id.to_string(),
                detail: blocker.reason,
            })
            .collect();
        top_blockers.extend(self.job_blockers(&findings, &requests, now)?);

        let mut risk_flags: Vec<RiskFlagView> = requests
            .iter()
            .filter(|request| request.is_overdue(now.date_naive()))
            .map(|request| RiskFlagView {
                kind: RiskKind::OverdueEvidenceRequest,
                kind_label: RiskKind::OverdueEvidenceRequest.label(),
                subject_id: Some(request.id.to_string()),
                detail: format!(
                    "{} was due {}",
                    request.title,
                    request
                        .due_date
                        .map(|due| due.to_string())
                        .unwrap_or_default()
                ),
            })
            .collect();
        if evidence_coverage < LOW_COVERAGE_PCT {
            risk_flags.push(RiskFlagView {
                kind: RiskKind::LowEvidenceCoverage,
                kind_label: RiskKind::LowEvidenceCoverage.label(),
                subject_id: None,
                detail: format!("{evidence_coverage:.0}% of requested required items received"),
            });
        }
        if external.ai_evaluation_freshness < STALE_AI_PCT {
            risk_flags.push(RiskFlagView {
                kind: RiskKind::StaleAiEvaluation,
                kind_label: RiskKind::StaleAiEvaluation.label(),
                subject_id: None,
                detail: "re-run AI evaluation before finalizing".to_string(),
            });
        }

        let mut open: Vec<&Finding> = findings.iter().filter(|finding| finding.is_open()).collect();
        open.sort_by(|a, b| worklist_order(a, b));
        let next_actions = open
            .into_iter()
            .map(|finding| NextAction {
                finding_id: finding.id.clone(),
                rule_id: finding.rule_id.clone(),
                title: finding.title.clone(),
                domain: finding.domain,
                severity: finding.severity,
                severity_label: finding.severity.label(),
                status: finding.status,
                status_label: finding.status.label(),
                qre_at_risk: finding.estimated_impact.qre_at_risk,
                credit_at_risk: finding.estimated_impact.credit_at_risk,
                requires_senior_review: requires_senior_escalation(finding, &settings),
                recommended_actions: finding.recommended_actions.clone(),
            })
            .collect();

        let report = ReadinessReport {
            scope: scope.clone(),
            score: score(&inputs),
            inputs,
            can_finalize: top_blockers.is_empty(),
            top_blockers,
            risk_flags,
            next_actions,
            assessed_at: now,
        };
        info!(
            client_id = %scope.client_id,
            tax_year = scope.tax_year,
            score = report.score,
            blockers = report.top_blockers.len(),
            "assessed study readiness"
        );
        Ok(report)
    }

    /// The latest job per target in scope, when it failed or has stalled.
    fn job_blockers(
        &self,
        findings: &[Finding],
        requests: &[EvidenceRequest],
        now: DateTime<Utc>,
    ) -> Result<Vec<BlockerView>, ReviewError> {
        let jobs = self.scheduler.list(&JobFilter::default())?;
        let mut latest: BTreeMap<String, ReprocessingJob> = BTreeMap::new();
        for job in jobs {
            let in_scope = match &job.target {
                ReprocessTarget::Finding { finding_id } => {
                    findings.iter().any(|finding| &finding.id == finding_id)
                }
                ReprocessTarget::EvidenceRequest { request_id } => {
                    requests.iter().any(|request| &request.id == request_id)
                }
            };
            if in_scope {
                // Listing is oldest first, so later entries win.
                latest.insert(job.target.label(), job);
            }
        }

        Ok(latest
            .into_values()
            .filter_map(|job| {
                let kind = match JobHealth::classify(&job, now, self.stall_ceiling) {
                    JobHealth::Failed => BlockerKind::FailedReprocessing,
                    JobHealth::Stalled => BlockerKind::StalledReprocessing,
                    _ => return None,
                };
                Some(BlockerView {
                    kind,
                    kind_label: kind.label(),
                    subject_id: job.id.to_string(),
                    detail: match &job.error {
                        Some(error) => format!("{}: {error}", job.target.label()),
                        None => job.target.label(),
                    },
                })
            })
            .collect())
    }
}

/// Severity descending, then credit at risk, then QRE at risk.
fn worklist_order(a: &Finding, b: &Finding) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| {
            b.estimated_impact
                .credit_at_risk
                .total_cmp(&a.estimated_impact.credit_at_risk)
        })
        .then_with(|| {
            b.estimated_impact
                .qre_at_risk
                .total_cmp(&a.estimated_impact.qre_at_risk)
        })
}
