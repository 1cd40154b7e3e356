use std::time::Duration;

use super::common::*;
use crate::workflows::review::domain::SYSTEM_ACTOR;
use crate::workflows::review::error::ReviewError;
use crate::workflows::review::evidence::{EvidenceFile, EvidenceFileStatus, EvidenceRequest};
use crate::workflows::review::findings::{Finding, FindingStatus};
use crate::workflows::review::repository::JobRepository;
use crate::workflows::review::reprocessing::{
    wait_for_target, EnqueueOutcome, JobFilter, JobHealth, JobStatus, JobSummary, PollPolicy,
    ReprocessTarget,
};
use crate::workflows::review::resolution::ResolutionType;

/// Request sent for `finding`, with the contract uploaded and linked back to it.
fn linked_contract(harness: &Harness, finding: &Finding) -> (EvidenceRequest, EvidenceFile) {
    let (request, token) = sent_request(harness, finding);
    let receipt = harness
        .desk
        .uploads()
        .upload(&token.token, vec![pdf("contract.pdf")], None, now())
        .expect("upload");
    let file = harness
        .desk
        .evidence()
        .link_file(&receipt.uploaded[0].id, &finding.id)
        .expect("link");
    (request, file)
}

fn request_target(request: &EvidenceRequest) -> ReprocessTarget {
    ReprocessTarget::EvidenceRequest {
        request_id: request.id.clone(),
    }
}

#[test]
fn linked_contract_auto_resolves_the_finding() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let (request, file) = linked_contract(&harness, &finding);

    let queued = harness
        .desk
        .reprocessing()
        .enqueue(request_target(&request), now())
        .expect("enqueue");
    assert!(matches!(queued, EnqueueOutcome::Queued(_)));
    assert_eq!(queued.job().status, JobStatus::Queued);

    let job = harness
        .desk
        .reprocessing()
        .run(&queued.job().id, now())
        .expect("run");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.job_summary,
        Some(JobSummary {
            rules_run: 1,
            findings_updated: 0,
            findings_auto_resolved: 1,
        })
    );

    let detail = harness.desk.findings().detail(&finding.id).expect("detail");
    assert_eq!(detail.finding.status, FindingStatus::ResolvedVerified);
    let last = detail.resolutions.last().expect("resolution recorded");
    assert_eq!(last.resolution_type, ResolutionType::VerifiedNoChange);
    assert_eq!(last.resolved_by, SYSTEM_ACTOR);

    let processed = harness.desk.evidence().file(&file.id).expect("file");
    assert_eq!(processed.status, EvidenceFileStatus::Processed);
    assert_eq!(processed.finding_id.as_ref(), Some(&finding.id));
}

#[test]
fn linking_evidence_queues_reprocessing_for_the_request() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let (request, token) = sent_request(&harness, &finding);
    let receipt = harness
        .desk
        .uploads()
        .upload(
            &token.token,
            vec![pdf("contract.pdf"), pdf("invoice.pdf").for_item("vendor_invoices")],
            None,
            now(),
        )
        .expect("upload");

    let contract = harness
        .desk
        .link_evidence_file(&receipt.uploaded[0].id, &finding.id, now())
        .expect("link contract");
    assert_eq!(contract.file.status, EvidenceFileStatus::Linked);
    assert_eq!(contract.job.status, JobStatus::Queued);
    assert_eq!(contract.job.target, request_target(&request));

    let invoice = harness
        .desk
        .link_evidence_file(&receipt.uploaded[1].id, &finding.id, now())
        .expect("link invoice");
    assert_eq!(invoice.job.id, contract.job.id, "pending job absorbs the second file");

    let finished = harness
        .desk
        .reprocessing()
        .run_next(now())
        .expect("run next")
        .expect("job ran");
    assert_eq!(finished.id, contract.job.id);
    assert_eq!(
        finished.job_summary.map(|summary| summary.findings_auto_resolved),
        Some(1)
    );
    assert_eq!(
        harness.desk.findings().get(&finding.id).expect("get").status,
        FindingStatus::ResolvedVerified
    );
}

#[test]
fn rerunning_a_finished_job_reports_the_same_summary() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let (request, _) = linked_contract(&harness, &finding);
    let scheduler = harness.desk.reprocessing();

    let job = scheduler
        .enqueue(request_target(&request), now())
        .expect("enqueue")
        .into_job();
    let first = scheduler.run(&job.id, now()).expect("first run");
    let second = scheduler.run(&job.id, now()).expect("second run");

    assert_eq!(second.attempts, 2);
    assert_eq!(first.job_summary, second.job_summary);
    let history = harness.desk.resolutions().history(&finding.id).expect("history");
    assert_eq!(
        history
            .iter()
            .filter(|resolution| resolution.resolved_by == SYSTEM_ACTOR)
            .count(),
        1
    );
}

#[test]
fn findings_without_new_evidence_stay_open() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let target = ReprocessTarget::Finding {
        finding_id: finding.id.clone(),
    };

    let job = harness
        .desk
        .reprocessing()
        .enqueue(target, now())
        .expect("enqueue")
        .into_job();
    let finished = harness.desk.reprocessing().run(&job.id, now()).expect("run");

    assert_eq!(
        finished.job_summary,
        Some(JobSummary {
            rules_run: 1,
            findings_updated: 1,
            findings_auto_resolved: 0,
        })
    );
    assert_eq!(
        harness.desk.findings().get(&finding.id).expect("get").status,
        FindingStatus::Open
    );
}

#[test]
fn enqueue_coalesces_while_a_job_is_pending() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let request = draft_request(&harness, &finding);
    let scheduler = harness.desk.reprocessing();

    let first = scheduler
        .enqueue(request_target(&request), now())
        .expect("enqueue");
    let second = scheduler
        .enqueue(request_target(&request), now())
        .expect("enqueue again");
    assert!(matches!(second, EnqueueOutcome::Coalesced(_)));
    assert_eq!(first.job().id, second.job().id);

    scheduler.run(&first.job().id, now()).expect("run");
    let third = scheduler
        .enqueue(request_target(&request), now())
        .expect("enqueue after completion");
    assert!(matches!(third, EnqueueOutcome::Queued(_)));
    assert_ne!(third.job().id, first.job().id);

    let jobs = scheduler
        .list(&JobFilter::for_target(request_target(&request)))
        .expect("list");
    assert_eq!(jobs.len(), 2);
}

#[test]
fn enqueue_rejects_unknown_targets() {
    let harness = harness();
    let result = harness.desk.reprocessing().enqueue(
        ReprocessTarget::Finding {
            finding_id: "fnd-missing".into(),
        },
        now(),
    );
    assert!(matches!(result, Err(ReviewError::NotFound { .. })));
}

#[test]
fn running_target_cannot_be_claimed_twice() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let request = draft_request(&harness, &finding);
    let job = harness
        .desk
        .reprocessing()
        .enqueue(request_target(&request), now())
        .expect("enqueue")
        .into_job();

    harness.store.claim(&job.id, now()).expect("claimed elsewhere");

    assert!(matches!(
        harness.desk.reprocessing().run(&job.id, now()),
        Err(ReviewError::ConcurrencyConflict { .. })
    ));
    assert_eq!(
        harness.desk.reprocessing().run_next(now()).expect("run next"),
        None
    );
}

#[test]
fn failed_jobs_are_recorded_and_can_be_retried() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    harness
        .store
        .put_snapshot(crate::workflows::review::findings::EntitySnapshot::new(
            finding.entity.clone(),
            &scope(),
        ))
        .expect("snapshot replaced");

    let job = harness
        .desk
        .reprocessing()
        .enqueue(
            ReprocessTarget::Finding {
                finding_id: finding.id.clone(),
            },
            now(),
        )
        .expect("enqueue")
        .into_job();

    let failed = harness
        .desk
        .reprocessing()
        .run_next(now())
        .expect("failure is reported as a job")
        .expect("job ran");
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|message| message.contains("amount")));
    assert_eq!(
        JobHealth::classify(&failed, now(), STALL_CEILING),
        JobHealth::Failed
    );

    harness
        .store
        .put_snapshot(contractor_snapshot("vendor-17", 30_000.0))
        .expect("snapshot restored");
    let retried = harness
        .desk
        .reprocessing()
        .run(&job.id, now())
        .expect("retry");
    assert_eq!(retried.status, JobStatus::Completed);
    assert!(retried.error.is_none());
    assert_eq!(retried.attempts, 2);
}

#[test]
fn verified_finding_reopens_when_the_rule_triggers_on_revised_data() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    harness
        .desk
        .resolutions()
        .verify(&finding.id, None, &reviewer())
        .expect("verify");
    harness
        .store
        .put_snapshot(contractor_snapshot("vendor-17", 45_000.0))
        .expect("revised snapshot");

    let job = harness
        .desk
        .reprocessing()
        .enqueue(
            ReprocessTarget::Finding {
                finding_id: finding.id.clone(),
            },
            now(),
        )
        .expect("enqueue")
        .into_job();
    let finished = harness.desk.reprocessing().run(&job.id, now()).expect("run");
    assert_eq!(
        finished.job_summary.map(|summary| summary.findings_updated),
        Some(1)
    );

    let detail = harness.desk.findings().detail(&finding.id).expect("detail");
    assert_eq!(detail.finding.status, FindingStatus::Open);
    assert_eq!(
        detail.finding.trigger_evidence.get("amount"),
        Some(&serde_json::json!(45_000.0))
    );
    let reopen = detail.resolutions.last().expect("reopen recorded");
    assert_eq!(reopen.resolution_type, ResolutionType::FieldUpdated);
    assert_eq!(reopen.status_from, FindingStatus::ResolvedVerified);
    assert!(reopen.field_changes.contains_key("amount"));
}

#[test]
fn rerun_after_a_reopen_resolves_from_current_state() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    harness
        .desk
        .resolutions()
        .verify(&finding.id, None, &reviewer())
        .expect("verify");
    harness
        .store
        .put_snapshot(contractor_snapshot("vendor-17", 45_000.0))
        .expect("revised snapshot");
    let scheduler = harness.desk.reprocessing();
    let job = scheduler
        .enqueue(
            ReprocessTarget::Finding {
                finding_id: finding.id.clone(),
            },
            now(),
        )
        .expect("enqueue")
        .into_job();

    let reopened = scheduler.run(&job.id, now()).expect("first run");
    assert_eq!(
        reopened.job_summary,
        Some(JobSummary {
            rules_run: 1,
            findings_updated: 1,
            findings_auto_resolved: 0,
        })
    );
    assert_eq!(
        harness.desk.findings().get(&finding.id).expect("get").status,
        FindingStatus::Open
    );

    harness
        .store
        .put_snapshot(contractor_snapshot("vendor-17", 45_000.0).with_field("contract_on_file", true))
        .expect("contract recorded");
    let resolved = scheduler.run(&job.id, now()).expect("second run");
    let expected = Some(JobSummary {
        rules_run: 1,
        findings_updated: 0,
        findings_auto_resolved: 1,
    });
    assert_eq!(resolved.job_summary, expected);
    assert_eq!(
        harness.desk.findings().get(&finding.id).expect("get").status,
        FindingStatus::ResolvedVerified
    );

    let repeated = scheduler.run(&job.id, now()).expect("third run");
    assert_eq!(repeated.job_summary, expected);
    let history = harness.desk.resolutions().history(&finding.id).expect("history");
    let system_entries: Vec<_> = history
        .iter()
        .filter(|resolution| resolution.resolved_by == SYSTEM_ACTOR)
        .map(|resolution| resolution.status_to)
        .collect();
    assert_eq!(
        system_entries,
        vec![FindingStatus::Open, FindingStatus::ResolvedVerified]
    );
}

#[test]
fn rerun_does_not_claim_a_resolution_written_by_a_reviewer() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    harness
        .store
        .put_snapshot(contractor_snapshot("vendor-17", 30_000.0).with_field("contract_on_file", true))
        .expect("contract recorded");
    harness
        .desk
        .resolutions()
        .verify(&finding.id, None, &reviewer())
        .expect("verify");

    let job = harness
        .desk
        .reprocessing()
        .enqueue(
            ReprocessTarget::Finding {
                finding_id: finding.id.clone(),
            },
            now(),
        )
        .expect("enqueue")
        .into_job();
    let finished = harness.desk.reprocessing().run(&job.id, now()).expect("run");
    assert_eq!(
        finished.job_summary,
        Some(JobSummary {
            rules_run: 1,
            ..JobSummary::default()
        })
    );
}

#[test]
fn escalated_findings_are_left_with_the_senior_reviewer() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    harness
        .desk
        .resolutions()
        .escalate(&finding.id, None, &reviewer())
        .expect("escalate");

    let job = harness
        .desk
        .reprocessing()
        .enqueue(
            ReprocessTarget::Finding {
                finding_id: finding.id.clone(),
            },
            now(),
        )
        .expect("enqueue")
        .into_job();
    let finished = harness.desk.reprocessing().run(&job.id, now()).expect("run");

    assert_eq!(
        finished.job_summary,
        Some(JobSummary {
            rules_run: 1,
            ..JobSummary::default()
        })
    );
    assert_eq!(
        harness.desk.findings().get(&finding.id).expect("get").status,
        FindingStatus::ResolvedEscalated
    );
}

#[tokio::test]
async fn waiting_returns_once_the_target_settles() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let (request, _) = linked_contract(&harness, &finding);
    let target = request_target(&request);
    let scheduler = harness.desk.reprocessing();
    let job = scheduler.enqueue(target.clone(), now()).expect("enqueue").into_job();
    scheduler.run(&job.id, now()).expect("run");

    let policy = PollPolicy::default()
        .with_jitter(0.0)
        .with_ceiling(Duration::from_secs(5));
    let jobs = wait_for_target(scheduler, &target, &policy)
        .await
        .expect("settled");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn waiting_gives_up_on_a_stalled_job() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let target = ReprocessTarget::Finding {
        finding_id: finding.id.clone(),
    };
    harness
        .desk
        .reprocessing()
        .enqueue(target.clone(), now())
        .expect("enqueue");

    let policy = PollPolicy::default().with_ceiling(STALL_CEILING);
    let result = wait_for_target(harness.desk.reprocessing(), &target, &policy).await;
    assert!(matches!(result, Err(ReviewError::JobTimedOut { .. })));
}
