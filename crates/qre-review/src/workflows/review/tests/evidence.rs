use chrono::Duration;

use super::common::*;
use crate::workflows::review::domain::{FindingId, ReviewScope};
use crate::workflows::review::error::ReviewError;
use crate::workflows::review::evidence::{
    CompletionOutcome, EvidenceFileStatus, EvidenceRequestFilter, EvidenceRequestStatus,
    NewEvidenceRequest, RequestType,
};
use crate::workflows::review::findings::FindingStatus;
use crate::workflows::review::resolution::ResolutionType;
use crate::workflows::review::settings::OrganizationSettings;

#[test]
fn create_drafts_a_vendor_contract_request() {
    let harness = harness();
    let finding = contractor_finding(&harness);

    let request = draft_request(&harness, &finding);

    assert_eq!(request.status, EvidenceRequestStatus::Draft);
    assert_eq!(request.request_type, RequestType::VendorContract);
    assert!(!request.requested_items.is_empty());
    assert!(request.requested_items.iter().any(|item| item.required));
    assert!(request.email_draft.contains(CLIENT_NAME));
    assert!(request.email_draft.contains("missing 1099"));
    assert_eq!(request.title, "Vendor contract documentation for tax year 2024");
    assert!(request.email_sent_at.is_none());

    let linked = harness.desk.findings().detail(&finding.id).expect("detail");
    assert_eq!(linked.finding.status, FindingStatus::InReview);
    assert_eq!(linked.resolutions.len(), 1);
    assert_eq!(
        linked.resolutions[0].resolution_type,
        ResolutionType::ClientEvidenceRequested
    );
    assert_eq!(
        linked.resolutions[0].evidence_request_id.as_ref(),
        Some(&request.id)
    );
}

#[test]
fn request_type_is_inferred_from_the_linked_rule() {
    let harness = harness();
    let finding = raise(
        &harness,
        employee_snapshot("emp-9", 400_000.0, 80.0),
        "wage_outlier",
    );

    let request = harness
        .desk
        .evidence()
        .create(
            &scope(),
            NewEvidenceRequest {
                reason: "wages above outlier threshold".to_string(),
                linked_finding_ids: vec![finding.id.clone()],
                ..NewEvidenceRequest::default()
            },
            &reviewer(),
        )
        .expect("request drafted");

    assert_eq!(request.request_type, RequestType::PayrollSupport);
    let keys: Vec<&str> = request
        .requested_items
        .iter()
        .map(|item| item.item_key.as_str())
        .collect();
    assert_eq!(keys, vec!["w2_forms", "payroll_register"]);
}

#[test]
fn create_validates_its_input() {
    let harness = harness();
    let evidence = harness.desk.evidence();

    let missing_reason = evidence.create(
        &scope(),
        NewEvidenceRequest {
            request_type: Some(RequestType::General),
            reason: "  ".to_string(),
            ..NewEvidenceRequest::default()
        },
        &reviewer(),
    );
    assert!(matches!(missing_reason, Err(ReviewError::Validation(_))));

    let untyped = evidence.create(
        &scope(),
        NewEvidenceRequest {
            reason: "general support".to_string(),
            ..NewEvidenceRequest::default()
        },
        &reviewer(),
    );
    assert!(matches!(untyped, Err(ReviewError::Validation(_))));

    let unknown_finding = evidence.create(
        &scope(),
        NewEvidenceRequest {
            reason: "support".to_string(),
            linked_finding_ids: vec![FindingId::from("fnd-missing")],
            ..NewEvidenceRequest::default()
        },
        &reviewer(),
    );
    assert!(matches!(unknown_finding, Err(ReviewError::NotFound { .. })));

    assert!(evidence
        .list(&EvidenceRequestFilter::default())
        .expect("list")
        .is_empty());
}

#[test]
fn resolved_findings_cannot_receive_new_requests() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    harness
        .desk
        .resolutions()
        .verify(&finding.id, None, &reviewer())
        .expect("verify");

    let result = harness.desk.evidence().create(
        &scope(),
        NewEvidenceRequest {
            reason: "late request".to_string(),
            linked_finding_ids: vec![finding.id.clone()],
            ..NewEvidenceRequest::default()
        },
        &reviewer(),
    );
    assert!(matches!(result, Err(ReviewError::InvalidTransition { .. })));
}

#[test]
fn a_terminal_finding_leaves_no_request_behind() {
    let harness = harness();
    let open = contractor_finding(&harness);
    let verified = raise(
        &harness,
        contractor_snapshot("vendor-18", 40_000.0),
        "vendor_contract_missing",
    );
    harness
        .desk
        .resolutions()
        .verify(&verified.id, None, &reviewer())
        .expect("verify");

    let result = harness.desk.evidence().create(
        &scope(),
        NewEvidenceRequest {
            reason: "contracts for both vendors".to_string(),
            linked_finding_ids: vec![open.id.clone(), verified.id.clone()],
            ..NewEvidenceRequest::default()
        },
        &reviewer(),
    );
    assert!(matches!(result, Err(ReviewError::InvalidTransition { .. })));

    let stored = harness
        .desk
        .evidence()
        .list(&EvidenceRequestFilter::default())
        .expect("list");
    assert!(stored.is_empty());
    assert_eq!(
        harness.desk.findings().get(&open.id).expect("get").status,
        FindingStatus::Open
    );
}

#[test]
fn request_evidence_needs_an_existing_request() {
    let harness = harness();
    let finding = contractor_finding(&harness);

    let result = harness.desk.evidence().request_evidence(
        &"evr-does-not-exist".into(),
        &finding.id,
        &reviewer(),
    );
    assert!(matches!(result, Err(ReviewError::NotFound { .. })));

    let detail = harness.desk.findings().detail(&finding.id).expect("detail");
    assert_eq!(detail.finding.status, FindingStatus::Open);
    assert!(detail.resolutions.is_empty());
}

#[test]
fn request_evidence_adds_the_finding_to_the_request() {
    let harness = harness();
    let first = contractor_finding(&harness);
    let request = draft_request(&harness, &first);
    let second = raise(
        &harness,
        contractor_snapshot("vendor-18", 40_000.0),
        "vendor_contract_missing",
    );

    let receipt = harness
        .desk
        .evidence()
        .request_evidence(&request.id, &second.id, &reviewer())
        .expect("request evidence");
    assert_eq!(receipt.finding.status, FindingStatus::InReview);
    assert_eq!(
        receipt.resolution.resolution_type,
        ResolutionType::ClientEvidenceRequested
    );
    assert_eq!(receipt.resolution.evidence_request_id.as_ref(), Some(&request.id));

    let stored = harness.desk.evidence().get(&request.id).expect("get");
    assert_eq!(stored.linked_finding_ids, vec![first.id.clone(), second.id.clone()]);

    harness
        .desk
        .evidence()
        .cancel(&request.id, now())
        .expect("cancel");
    let third = raise(
        &harness,
        contractor_snapshot("vendor-19", 35_000.0),
        "vendor_contract_missing",
    );
    assert!(matches!(
        harness
            .desk
            .evidence()
            .request_evidence(&request.id, &third.id, &reviewer()),
        Err(ReviewError::InvalidRequestState { .. })
    ));
}

#[test]
fn mark_sent_stamps_the_email_and_issues_a_token_once() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let (request, token) = sent_request(&harness, &finding);

    assert_eq!(request.status, EvidenceRequestStatus::Sent);
    assert_eq!(request.email_sent_at, Some(now()));
    assert_eq!(token.request_id, request.id);
    assert_eq!(token.expires_at, now() + Duration::days(14));
    assert_eq!(token.uploads_remaining, 20);

    let again = harness.desk.evidence().mark_sent(&scope(), &request.id, now());
    assert!(matches!(
        again,
        Err(ReviewError::InvalidRequestState { from: "sent", .. })
    ));
}

#[test]
fn mark_sent_rejects_an_unrepresentable_link_expiry() {
    let harness = harness_with(OrganizationSettings {
        evidence_token_expiration_days: u32::MAX,
        ..OrganizationSettings::default()
    });
    let finding = contractor_finding(&harness);
    let draft = draft_request(&harness, &finding);

    let sent = harness.desk.evidence().mark_sent(&scope(), &draft.id, now());
    assert!(matches!(sent, Err(ReviewError::Validation(_))));
    let stored = harness.desk.evidence().get(&draft.id).expect("request");
    assert_eq!(stored.status, EvidenceRequestStatus::Draft);
    assert_eq!(stored.email_sent_at, None);
}

#[test]
fn sending_and_regenerating_stay_within_the_request_scope() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let draft = draft_request(&harness, &finding);
    let other_year = ReviewScope::new(ORG, CLIENT, YEAR - 1);
    let other_org = ReviewScope::new("org-rival", CLIENT, YEAR);

    for outside in [&other_year, &other_org] {
        let sent = harness.desk.evidence().mark_sent(outside, &draft.id, now());
        assert!(matches!(sent, Err(ReviewError::Validation(_))));
    }
    assert_eq!(
        harness.desk.evidence().get(&draft.id).expect("request").status,
        EvidenceRequestStatus::Draft
    );

    harness
        .desk
        .evidence()
        .mark_sent(&scope(), &draft.id, now())
        .expect("sent in scope");
    let regenerated = harness
        .desk
        .uploads()
        .regenerate(&other_org, &draft.id, now());
    assert!(matches!(regenerated, Err(ReviewError::Validation(_))));
}

#[test]
fn complete_reports_blockers_without_changing_status() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let (request, _) = sent_request(&harness, &finding);

    let outcome = harness
        .desk
        .evidence()
        .complete(&request.id, now())
        .expect("complete evaluates");
    assert_eq!(
        outcome,
        CompletionOutcome::Blocked {
            blockers: vec!["no_files_received".to_string(), "signed_contract".to_string()],
        }
    );
    assert_eq!(
        harness.desk.evidence().get(&request.id).expect("get").status,
        EvidenceRequestStatus::Sent
    );
}

#[test]
fn complete_closes_the_request_and_its_link() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let (request, token) = sent_request(&harness, &finding);
    harness
        .desk
        .uploads()
        .upload(&token.token, vec![pdf("contract.pdf")], Some("signed_contract"), now())
        .expect("upload");

    let outcome = harness
        .desk
        .evidence()
        .complete(&request.id, now())
        .expect("complete");
    match outcome {
        CompletionOutcome::Completed { request } => {
            assert_eq!(request.status, EvidenceRequestStatus::Completed)
        }
        other => panic!("expected completion, got {other:?}"),
    }

    let status = harness
        .desk
        .uploads()
        .check_status(&token.token, now())
        .expect("status");
    assert!(!status.valid);
}

#[test]
fn cancel_revokes_the_link_and_is_terminal() {
    let harness = harness();
    let finding = contractor_finding(&harness);
    let (request, token) = sent_request(&harness, &finding);

    let cancelled = harness
        .desk
        .evidence()
        .cancel(&request.id, now())
        .expect("cancel");
    assert_eq!(cancelled.status, EvidenceRequestStatus::Cancelled);
    assert!(matches!(
        harness.desk.uploads().upload(&token.token, vec![pdf("late.pdf")], None, now()),
        Err(ReviewError::InvalidToken)
    ));
    assert!(matches!(
        harness.desk.evidence().cancel(&request.id, now()),
        Err(ReviewError::InvalidRequestState { .. })
    ));
}

#[test]
fn received_files_are_linked_or_rejected_by_reviewers() {
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
    assert_eq!(receipt.request_status, EvidenceRequestStatus::Received);
    let contract = &receipt.uploaded[0];
    let invoice = &receipt.uploaded[1];

    let linked = harness
        .desk
        .evidence()
        .link_file(&contract.id, &finding.id)
        .expect("link");
    assert_eq!(linked.status, EvidenceFileStatus::Linked);
    assert_eq!(linked.finding_id.as_ref(), Some(&finding.id));
    let relinked = harness
        .desk
        .evidence()
        .link_file(&contract.id, &finding.id)
        .expect("linking again is a no-op");
    assert_eq!(relinked, linked);

    assert!(matches!(
        harness.desk.evidence().reject_file(&invoice.id, ""),
        Err(ReviewError::Validation(_))
    ));
    let rejected = harness
        .desk
        .evidence()
        .reject_file(&invoice.id, "illegible scan")
        .expect("reject");
    assert_eq!(rejected.status, EvidenceFileStatus::Rejected);
    assert!(matches!(
        harness.desk.evidence().link_file(&invoice.id, &finding.id),
        Err(ReviewError::Validation(_))
    ));

    harness
        .desk
        .evidence()
        .reject_file(&contract.id, "wrong vendor")
        .expect("reject contract");
    assert_eq!(
        harness.desk.evidence().get(&request.id).expect("get").status,
        EvidenceRequestStatus::Received,
        "status never regresses"
    );
}
