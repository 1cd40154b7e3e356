use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::review::desk::{ReviewBackends, ReviewDesk};
use crate::workflows::review::domain::{ClientId, OrganizationId, ReviewScope, ReviewerAction};
use crate::workflows::review::evidence::{EvidenceRequest, NewEvidenceRequest, RequestType};
use crate::workflows::review::findings::{
    EntityRef, EntitySnapshot, EntityType, Finding, RuleCatalog,
};
use crate::workflows::review::memory::{MemoryBlobStore, MemoryReviewStore, StaticDirectory};
use crate::workflows::review::settings::OrganizationSettings;
use crate::workflows::review::upload::{IncomingFile, IssuedToken};

pub(super) const ORG: &str = "org-acme";
pub(super) const CLIENT: &str = "cli-widgets";
pub(super) const CLIENT_NAME: &str = "Widget Works LLC";
pub(super) const YEAR: i32 = 2024;
pub(super) const STALL_CEILING: Duration = Duration::from_secs(600);

pub(super) fn scope() -> ReviewScope {
    ReviewScope::new(ORG, CLIENT, YEAR)
}

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn reviewer() -> ReviewerAction {
    ReviewerAction::new("reviewer@acme.test", now())
}

pub(super) struct Harness {
    pub(super) store: MemoryReviewStore,
    pub(super) blobs: MemoryBlobStore,
    pub(super) desk: Arc<ReviewDesk>,
}

pub(super) fn harness() -> Harness {
    harness_with(OrganizationSettings::default())
}

pub(super) fn harness_with(settings: OrganizationSettings) -> Harness {
    let store = MemoryReviewStore::new();
    let blobs = MemoryBlobStore::new();
    let directory = StaticDirectory::new()
        .with_organization(OrganizationId::from(ORG), settings)
        .with_client(OrganizationId::from(ORG), ClientId::from(CLIENT), CLIENT_NAME);
    let desk = Arc::new(ReviewDesk::new(
        ReviewBackends::in_memory(&store, &blobs, directory),
        RuleCatalog::standard(),
        STALL_CEILING,
    ));
    Harness { store, blobs, desk }
}

pub(super) fn contractor_snapshot(id: &str, amount: f64) -> EntitySnapshot {
    EntitySnapshot::new(EntityRef::new(EntityType::Contractor, id), &scope())
        .with_field("amount", amount)
        .with_field("vendor", "Acme Labs")
}

pub(super) fn employee_snapshot(id: &str, wages: f64, allocation_pct: f64) -> EntitySnapshot {
    EntitySnapshot::new(EntityRef::new(EntityType::Employee, id), &scope())
        .with_field("qualified_wages", wages)
        .with_field("rd_allocation_pct", allocation_pct)
}

/// Store the snapshot and evaluate it, returning the finding raised by `rule_id`.
pub(super) fn raise(harness: &Harness, snapshot: EntitySnapshot, rule_id: &str) -> Finding {
    let entity = snapshot.entity.clone();
    harness.store.put_snapshot(snapshot).expect("snapshot stored");
    harness
        .desk
        .evaluate_entity(&scope(), &entity, now())
        .expect("evaluation succeeds")
        .into_iter()
        .find(|finding| finding.rule_id == rule_id)
        .expect("rule triggered")
}

pub(super) fn contractor_finding(harness: &Harness) -> Finding {
    raise(
        harness,
        contractor_snapshot("vendor-17", 30_000.0),
        "vendor_contract_missing",
    )
}

pub(super) fn draft_request(harness: &Harness, finding: &Finding) -> EvidenceRequest {
    harness
        .desk
        .evidence()
        .create(
            &scope(),
            NewEvidenceRequest {
                request_type: Some(RequestType::VendorContract),
                reason: "missing 1099".to_string(),
                linked_finding_ids: vec![finding.id.clone()],
                ..NewEvidenceRequest::default()
            },
            &reviewer(),
        )
        .expect("request drafted")
}

pub(super) fn sent_request(harness: &Harness, finding: &Finding) -> (EvidenceRequest, IssuedToken) {
    let draft = draft_request(harness, finding);
    let sent = harness
        .desk
        .evidence()
        .mark_sent(&scope(), &draft.id, now())
        .expect("request sent");
    (sent.request, sent.upload_token)
}

pub(super) fn pdf(name: &str) -> IncomingFile {
    IncomingFile::new(name, "application/pdf", b"%PDF-1.7 signed".to_vec())
}

pub(super) fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

pub(super) fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 256 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
