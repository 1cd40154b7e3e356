use std::io::Write;

use serde::Serialize;

use super::views::ReadinessReport;

#[derive(Debug)]
pub enum WorklistExportError {
    Io(std::io::Error),
    Csv(csv::Error),
}

impl std::fmt::Display for WorklistExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorklistExportError::Io(err) => write!(f, "failed to write worklist: {}", err),
            WorklistExportError::Csv(err) => write!(f, "failed to encode worklist CSV: {}", err),
        }
    }
}

impl std::error::Error for WorklistExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorklistExportError::Io(err) => Some(err),
            WorklistExportError::Csv(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for WorklistExportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for WorklistExportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

#[derive(Debug, Serialize)]
struct WorklistRow<'a> {
    #[serde(rename = "Rank")]
    rank: usize,
    #[serde(rename = "Finding")]
    finding_id: &'a str,
    #[serde(rename = "Rule")]
    rule_id: &'a str,
    #[serde(rename = "Title")]
    title: &'a str,
    #[serde(rename = "Severity")]
    severity: &'a str,
    #[serde(rename = "Status")]
    status: &'a str,
    #[serde(rename = "QRE At Risk")]
    qre_at_risk: String,
    #[serde(rename = "Credit At Risk")]
    credit_at_risk: String,
    #[serde(rename = "Senior Review")]
    senior_review: &'a str,
}

/// Write the report's next actions as CSV, one row per open finding in worklist order.
pub fn write_worklist_csv<W: Write>(
    report: &ReadinessReport,
    writer: W,
) -> Result<(), WorklistExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for (index, action) in report.next_actions.iter().enumerate() {
        csv_writer.serialize(WorklistRow {
            rank: index + 1,
            finding_id: action.finding_id.as_str(),
            rule_id: &action.rule_id,
            title: &action.title,
            severity: action.severity_label,
            status: action.status_label,
            qre_at_risk: format!("{:.2}", action.qre_at_risk),
            credit_at_risk: format!("{:.2}", action.credit_at_risk),
            senior_review: if action.requires_senior_review { "yes" } else { "no" },
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::review::domain::{FindingId, ReviewScope};
    use crate::workflows::review::findings::domain::{FindingDomain, FindingStatus, Severity};
    use crate::workflows::review::readiness::scorer::ReadinessInputs;
    use crate::workflows::review::readiness::views::NextAction;
    use chrono::Utc;

    #[test]
    fn writes_header_and_ranked_rows() {
        let report = ReadinessReport {
            scope: ReviewScope::new("org-1", "cli-1", 2024),
            score: 80.0,
            inputs: ReadinessInputs::complete(),
            can_finalize: true,
            top_blockers: Vec::new(),
            risk_flags: Vec::new(),
            next_actions: vec![NextAction {
                finding_id: FindingId::from("fnd-1"),
                rule_id: "wage_outlier".to_string(),
                title: "Wages, above threshold".to_string(),
                domain: FindingDomain::Wages,
                severity: Severity::High,
                severity_label: Severity::High.label(),
                status: FindingStatus::Open,
                status_label: FindingStatus::Open.label(),
                qre_at_risk: 1200.5,
                credit_at_risk: 78.0325,
                requires_senior_review: false,
                recommended_actions: Vec::new(),
            }],
            assessed_at: Utc::now(),
        };

        let mut buffer = Vec::new();
        write_worklist_csv(&report, &mut buffer).expect("csv written");
        let text = String::from_utf8(buffer).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Rank,Finding,Rule,Title,Severity,Status,QRE At Risk,Credit At Risk,Senior Review")
        );
        assert_eq!(
            lines.next(),
            Some("1,fnd-1,wage_outlier,\"Wages, above threshold\",high,open,1200.50,78.03,no")
        );
        assert_eq!(lines.next(), None);
    }
}
