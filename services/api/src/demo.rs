use crate::infra::{demo_scope, in_memory_desk, seed_demo_findings, InMemoryDesk};
use chrono::Utc;
use clap::Args;
use qre_review::error::AppError;
use qre_review::workflows::review::evidence::{CompletionOutcome, NewEvidenceRequest};
use qre_review::workflows::review::findings::Finding;
use qre_review::workflows::review::readiness::{
    write_worklist_csv, ExternalSignals, ReadinessReport,
};
use qre_review::workflows::review::reprocessing::DEFAULT_STALL_CEILING;
use qre_review::workflows::review::upload::IncomingFile;
use qre_review::workflows::review::{ReviewError, ReviewScope, ReviewerAction};
use std::path::PathBuf;

const DEMO_REVIEWER: &str = "demo.reviewer@cpa.test";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Tax year of the sample engagement
    #[arg(long, default_value_t = 2024)]
    pub(crate) tax_year: i32,
    /// Upload this file as the client's signed contract instead of a generated placeholder
    #[arg(long)]
    pub(crate) evidence: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct WorklistArgs {
    /// Tax year of the sample engagement
    #[arg(long, default_value_t = 2024)]
    pub(crate) tax_year: i32,
    /// Emit CSV instead of a text table
    #[arg(long)]
    pub(crate) csv: bool,
}

fn demo_signals() -> ExternalSignals {
    ExternalSignals {
        data_completeness: 92.0,
        questionnaire_completeness: 80.0,
        gaps_resolved: 65.0,
        ai_evaluation_freshness: 75.0,
        study_decisions_locked: 40.0,
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let scope = demo_scope(args.tax_year);
    let seeded = in_memory_desk(DEFAULT_STALL_CEILING);
    let reviewer = ReviewerAction::new(DEMO_REVIEWER, Utc::now());

    println!(
        "QRE review demo: {} tax year {}",
        scope.client_id, scope.tax_year
    );
    let findings = seed_demo_findings(&seeded, &scope, Utc::now())?;
    println!("\nFindings raised by the standard rule catalog");
    for finding in &findings {
        print_finding(finding);
    }

    let Some(contractor) = findings
        .iter()
        .find(|finding| finding.rule_id == "vendor_contract_missing")
    else {
        println!("No contractor finding raised; nothing to request.");
        return Ok(());
    };

    println!("\nEvidence request");
    let request = seeded.desk.evidence().create(
        &scope,
        NewEvidenceRequest {
            reason: "No signed agreement on file for contract research spend".to_string(),
            linked_finding_ids: vec![contractor.id.clone()],
            ..NewEvidenceRequest::default()
        },
        &reviewer,
    )?;
    println!(
        "- {} [{}] {}",
        request.id,
        request.request_type.label(),
        request.title
    );
    for item in &request.requested_items {
        println!(
            "  - {} ({})",
            item.label,
            if item.required { "required" } else { "optional" }
        );
    }
    println!("  Email draft:");
    for line in request.email_draft.lines() {
        println!("    | {line}");
    }

    let sent = seeded
        .desk
        .evidence()
        .mark_sent(&scope, &request.id, Utc::now())?;
    println!(
        "- Sent; upload link valid until {} for {} files",
        sent.upload_token.expires_at.format("%Y-%m-%d %H:%M UTC"),
        sent.upload_token.uploads_remaining
    );

    let link = seeded
        .desk
        .uploads()
        .check_status(&sent.upload_token.token, Utc::now())?;
    println!(
        "- Client opened link (valid: {}, client: {})",
        link.valid,
        link.client_name.as_deref().unwrap_or("unknown")
    );

    let upload = contract_upload(args.evidence)?;
    let receipt = seeded.desk.uploads().upload(
        &sent.upload_token.token,
        vec![upload],
        None,
        Utc::now(),
    )?;
    for file in &receipt.uploaded {
        println!(
            "- Received {} ({}, {} bytes) for {}",
            file.original_filename,
            file.mime_type,
            file.size_bytes,
            file.item_key.as_deref().unwrap_or("request")
        );
    }
    for rejected in &receipt.rejected {
        println!("- Rejected {}: {}", rejected.filename, rejected.message);
    }
    println!(
        "  Request status: {} | uploads remaining: {}",
        receipt.request_status.label(),
        receipt.uploads_remaining
    );

    println!("\nReprocessing");
    for file in &receipt.uploaded {
        let linked = seeded
            .desk
            .link_evidence_file(&file.id, &contractor.id, Utc::now())?;
        println!(
            "- Linked {} to {}; job {} {}",
            linked.file.original_filename,
            contractor.id,
            linked.job.id,
            linked.job.status.label()
        );
    }
    if let Some(job) = seeded.desk.reprocessing().run_next(Utc::now())? {
        let summary = job.job_summary.unwrap_or_default();
        println!(
            "- Job {} {}: {} rules run, {} updated, {} auto-resolved",
            job.id,
            job.status.label(),
            summary.rules_run,
            summary.findings_updated,
            summary.findings_auto_resolved
        );
    }
    let refreshed = seeded.desk.findings().get(&contractor.id)?;
    println!("- {} is now {}", refreshed.id, refreshed.status.label());

    match seeded.desk.evidence().complete(&request.id, Utc::now())? {
        CompletionOutcome::Completed { request } => {
            println!("- Request {} completed", request.id)
        }
        CompletionOutcome::Blocked { blockers } => {
            println!("- Request still waiting on: {}", blockers.join(", "))
        }
    }
    let after = seeded
        .desk
        .uploads()
        .check_status(&sent.upload_token.token, Utc::now())?;
    println!("- Upload link valid after completion: {}", after.valid);

    println!("\nReviewer resolutions");
    resolve_remaining(&seeded, &findings, &reviewer);

    println!("\nReadiness");
    let report = seeded
        .desk
        .readiness()
        .assess(&scope, demo_signals(), Utc::now())?;
    print_readiness(&report);
    Ok(())
}

pub(crate) fn run_worklist(args: WorklistArgs) -> Result<(), AppError> {
    let scope = demo_scope(args.tax_year);
    let report = demo_worklist(&scope)?;

    if args.csv {
        let stdout = std::io::stdout();
        write_worklist_csv(&report, stdout.lock())?;
        return Ok(());
    }

    println!(
        "Worklist for {} tax year {} (readiness {:.1})",
        scope.client_id, scope.tax_year, report.score
    );
    for (index, action) in report.next_actions.iter().enumerate() {
        println!(
            "{:>2}. [{}] {} | credit at risk {:.2}{}",
            index + 1,
            action.severity_label,
            action.title,
            action.credit_at_risk,
            if action.requires_senior_review {
                " | senior review"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn demo_worklist(scope: &ReviewScope) -> Result<ReadinessReport, ReviewError> {
    let seeded = in_memory_desk(DEFAULT_STALL_CEILING);
    seed_demo_findings(&seeded, scope, Utc::now())?;
    seeded
        .desk
        .readiness()
        .assess(scope, demo_signals(), Utc::now())
}

fn contract_upload(path: Option<PathBuf>) -> Result<IncomingFile, AppError> {
    let Some(path) = path else {
        return Ok(IncomingFile::new(
            "fabworks-msa-signed.pdf",
            "application/pdf",
            b"%PDF-1.7 FabWorks master services agreement".to_vec(),
        ));
    };
    let bytes = std::fs::read(&path)?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "evidence".to_string());
    let mime_type = mime_guess::from_path(&path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_default();
    Ok(IncomingFile::new(filename, mime_type, bytes))
}

/// Show each remaining reviewer path: a dismissal attempt without a note, a corrected
/// dismissal, and an escalation.
fn resolve_remaining(seeded: &InMemoryDesk, findings: &[Finding], reviewer: &ReviewerAction) {
    let resolutions = seeded.desk.resolutions();
    for finding in findings {
        let outcome = match finding.rule_id.as_str() {
            "allocation_out_of_bounds" => {
                let missing_note =
                    resolutions.dismiss(&finding.id, "documented_exception", "", reviewer);
                if let Err(err) = missing_note {
                    println!("- Dismiss without a note refused: {err}");
                }
                resolutions.dismiss(
                    &finding.id,
                    "documented_exception",
                    "Allocation confirmed against project timesheets",
                    reviewer,
                )
            }
            "wage_outlier" => resolutions.escalate(
                &finding.id,
                Some("Compensation exceeds firm threshold".to_string()),
                reviewer,
            ),
            _ => continue,
        };
        match outcome {
            Ok(receipt) => println!(
                "- {} {} -> {}",
                receipt.finding.id,
                receipt.resolution.resolution_type.label(),
                receipt.finding.status.label()
            ),
            Err(err) => println!("- {} unchanged: {err}", finding.id),
        }
    }
}

fn print_finding(finding: &Finding) {
    println!(
        "- {} [{}] {} | QRE at risk {:.2} | credit at risk {:.2}",
        finding.id,
        finding.severity.label(),
        finding.title,
        finding.estimated_impact.qre_at_risk,
        finding.estimated_impact.credit_at_risk
    );
}

fn print_readiness(report: &ReadinessReport) {
    println!(
        "- Score {:.1} | can finalize: {}",
        report.score, report.can_finalize
    );
    for blocker in &report.top_blockers {
        println!("  Blocker ({}): {}", blocker.kind_label, blocker.detail);
    }
    for flag in &report.risk_flags {
        println!("  Risk ({}): {}", flag.kind_label, flag.detail);
    }
    for action in &report.next_actions {
        println!("  Next: [{}] {}", action.severity_label, action.title);
    }
}
