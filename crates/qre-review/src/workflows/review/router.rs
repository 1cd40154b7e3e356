use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::Engine as _;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::desk::ReviewDesk;
use super::domain::{
    EvidenceFileId, EvidenceRequestId, FindingId, JobId, ReviewScope, ReviewerAction,
};
use super::error::ReviewError;
use super::evidence::{EvidenceRequestFilter, EvidenceRequestStatus, NewEvidenceRequest, RequestType};
use super::findings::{EntityRef, EntityType, FindingDomain, FindingFilter, FindingStatus, Severity};
use super::readiness::ExternalSignals;
use super::repository::RepositoryError;
use super::reprocessing::{EnqueueOutcome, JobFilter, JobHealth, JobStatus, ReprocessTarget};
use super::upload::IncomingFile;

/// HTTP surface for reviewers and the credential-free client upload link.
pub fn review_router(desk: Arc<ReviewDesk>) -> Router {
    Router::new()
        .route("/api/v1/review/findings", get(list_findings))
        .route("/api/v1/review/findings/evaluate", post(evaluate_entity))
        .route("/api/v1/review/findings/:finding_id", get(finding_detail))
        .route("/api/v1/review/findings/:finding_id/verify", post(verify_finding))
        .route(
            "/api/v1/review/findings/:finding_id/update-fields",
            post(update_finding_fields),
        )
        .route("/api/v1/review/findings/:finding_id/dismiss", post(dismiss_finding))
        .route("/api/v1/review/findings/:finding_id/escalate", post(escalate_finding))
        .route(
            "/api/v1/review/findings/:finding_id/request-evidence",
            post(request_finding_evidence),
        )
        .route("/api/v1/review/senior-worklist", get(senior_worklist))
        .route(
            "/api/v1/review/evidence-requests",
            get(list_evidence_requests).post(create_evidence_request),
        )
        .route(
            "/api/v1/review/evidence-requests/:request_id",
            get(evidence_request_detail),
        )
        .route(
            "/api/v1/review/evidence-requests/:request_id/send",
            post(send_evidence_request),
        )
        .route(
            "/api/v1/review/evidence-requests/:request_id/complete",
            post(complete_evidence_request),
        )
        .route(
            "/api/v1/review/evidence-requests/:request_id/cancel",
            post(cancel_evidence_request),
        )
        .route(
            "/api/v1/review/evidence-requests/:request_id/token/revoke",
            post(revoke_upload_token),
        )
        .route(
            "/api/v1/review/evidence-requests/:request_id/token/regenerate",
            post(regenerate_upload_token),
        )
        .route("/api/v1/review/evidence-files/:file_id/link", post(link_evidence_file))
        .route("/api/v1/review/evidence-files/:file_id/reject", post(reject_evidence_file))
        .route(
            "/api/v1/review/reprocessing-jobs",
            get(list_jobs).post(enqueue_job),
        )
        .route("/api/v1/review/reprocessing-jobs/:job_id", get(job_detail))
        .route("/api/v1/review/reprocessing-jobs/:job_id/run", post(run_job))
        .route("/api/v1/review/readiness", post(assess_readiness))
        .route("/api/v1/upload/:token", get(upload_link_status).post(upload_files))
        .with_state(desk)
}

/// Map a workflow error onto a status code and JSON body.
pub(crate) fn error_response(error: ReviewError) -> Response {
    let status = match &error {
        ReviewError::InvalidToken => {
            return (StatusCode::NOT_FOUND, axum::Json(json!({ "valid": false }))).into_response();
        }
        ReviewError::Validation(_) | ReviewError::Rule(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReviewError::NotFound { .. } | ReviewError::Repository(RepositoryError::NotFound) => {
            StatusCode::NOT_FOUND
        }
        ReviewError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        ReviewError::InvalidTransition { .. }
        | ReviewError::EscalationRequired { .. }
        | ReviewError::InvalidRequestState { .. }
        | ReviewError::ConcurrencyConflict { .. }
        | ReviewError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        ReviewError::JobTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
        ReviewError::JobExecution { .. } | ReviewError::Repository(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, ReviewError>) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScopePayload {
    organization_id: String,
    client_id: String,
    tax_year: i32,
}

impl ScopePayload {
    fn scope(&self) -> ReviewScope {
        ReviewScope::new(&self.organization_id, &self.client_id, self.tax_year)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActorPayload {
    resolved_by: String,
    #[serde(default)]
    idempotency_key: Option<String>,
}

impl ActorPayload {
    fn action(&self) -> ReviewerAction {
        let action = ReviewerAction::new(self.resolved_by.clone(), Utc::now());
        match &self.idempotency_key {
            Some(key) if !key.trim().is_empty() => action.with_idempotency_key(key.trim()),
            _ => action,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FindingQuery {
    status: Option<FindingStatus>,
    severity: Option<Severity>,
    domain: Option<FindingDomain>,
    client_id: Option<String>,
    tax_year: Option<i32>,
}

impl FindingQuery {
    fn filter(self) -> FindingFilter {
        FindingFilter {
            status: self.status,
            severity: self.severity,
            domain: self.domain,
            client_id: self.client_id.as_deref().map(Into::into),
            tax_year: self.tax_year,
        }
    }
}

pub(crate) async fn list_findings(
    State(desk): State<Arc<ReviewDesk>>,
    Query(query): Query<FindingQuery>,
) -> Response {
    respond(StatusCode::OK, desk.findings().list(&query.filter()))
}

pub(crate) async fn senior_worklist(
    State(desk): State<Arc<ReviewDesk>>,
    Query(query): Query<FindingQuery>,
) -> Response {
    respond(StatusCode::OK, desk.resolutions().senior_worklist(&query.filter()))
}

#[derive(Debug, Deserialize)]
pub(crate) struct EvaluatePayload {
    #[serde(flatten)]
    scope: ScopePayload,
    entity_type: EntityType,
    entity_id: String,
}

pub(crate) async fn evaluate_entity(
    State(desk): State<Arc<ReviewDesk>>,
    axum::Json(payload): axum::Json<EvaluatePayload>,
) -> Response {
    let entity = EntityRef::new(payload.entity_type, payload.entity_id.clone());
    respond(
        StatusCode::OK,
        desk.evaluate_entity(&payload.scope.scope(), &entity, Utc::now()),
    )
}

pub(crate) async fn finding_detail(
    State(desk): State<Arc<ReviewDesk>>,
    Path(finding_id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.findings().detail(&FindingId(finding_id)),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct NotePayload {
    #[serde(flatten)]
    actor: ActorPayload,
    #[serde(default)]
    note: Option<String>,
}

pub(crate) async fn verify_finding(
    State(desk): State<Arc<ReviewDesk>>,
    Path(finding_id): Path<String>,
    axum::Json(payload): axum::Json<NotePayload>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.resolutions()
            .verify(&FindingId(finding_id), payload.note, &payload.actor.action()),
    )
}

pub(crate) async fn escalate_finding(
    State(desk): State<Arc<ReviewDesk>>,
    Path(finding_id): Path<String>,
    axum::Json(payload): axum::Json<NotePayload>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.resolutions()
            .escalate(&FindingId(finding_id), payload.note, &payload.actor.action()),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct RequestEvidencePayload {
    #[serde(flatten)]
    actor: ActorPayload,
    evidence_request_id: EvidenceRequestId,
}

pub(crate) async fn request_finding_evidence(
    State(desk): State<Arc<ReviewDesk>>,
    Path(finding_id): Path<String>,
    axum::Json(payload): axum::Json<RequestEvidencePayload>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.evidence().request_evidence(
            &payload.evidence_request_id,
            &FindingId(finding_id),
            &payload.actor.action(),
        ),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateFieldsPayload {
    #[serde(flatten)]
    actor: ActorPayload,
    fields: BTreeMap<String, Value>,
    #[serde(default)]
    note: Option<String>,
}

pub(crate) async fn update_finding_fields(
    State(desk): State<Arc<ReviewDesk>>,
    Path(finding_id): Path<String>,
    axum::Json(payload): axum::Json<UpdateFieldsPayload>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.resolutions().update_fields(
            &FindingId(finding_id),
            payload.fields,
            payload.note,
            &payload.actor.action(),
        ),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct DismissPayload {
    #[serde(flatten)]
    actor: ActorPayload,
    #[serde(default)]
    reason_code: String,
    #[serde(default)]
    note: String,
}

pub(crate) async fn dismiss_finding(
    State(desk): State<Arc<ReviewDesk>>,
    Path(finding_id): Path<String>,
    axum::Json(payload): axum::Json<DismissPayload>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.resolutions().dismiss(
            &FindingId(finding_id),
            &payload.reason_code,
            &payload.note,
            &payload.actor.action(),
        ),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRequestPayload {
    #[serde(flatten)]
    scope: ScopePayload,
    #[serde(flatten)]
    actor: ActorPayload,
    #[serde(default)]
    request_type: Option<RequestType>,
    reason: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    linked_finding_ids: Vec<FindingId>,
    #[serde(default)]
    due_date: Option<NaiveDate>,
}

pub(crate) async fn create_evidence_request(
    State(desk): State<Arc<ReviewDesk>>,
    axum::Json(payload): axum::Json<CreateRequestPayload>,
) -> Response {
    let action = payload.actor.action();
    let input = NewEvidenceRequest {
        request_type: payload.request_type,
        reason: payload.reason,
        title: payload.title,
        linked_finding_ids: payload.linked_finding_ids,
        due_date: payload.due_date,
    };
    respond(
        StatusCode::CREATED,
        desk.evidence().create(&payload.scope.scope(), input, &action),
    )
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RequestQuery {
    client_id: Option<String>,
    tax_year: Option<i32>,
    status: Option<EvidenceRequestStatus>,
}

pub(crate) async fn list_evidence_requests(
    State(desk): State<Arc<ReviewDesk>>,
    Query(query): Query<RequestQuery>,
) -> Response {
    let filter = EvidenceRequestFilter {
        client_id: query.client_id.as_deref().map(Into::into),
        tax_year: query.tax_year,
        status: query.status,
    };
    respond(StatusCode::OK, desk.evidence().list(&filter))
}

pub(crate) async fn evidence_request_detail(
    State(desk): State<Arc<ReviewDesk>>,
    Path(request_id): Path<String>,
) -> Response {
    let id = EvidenceRequestId(request_id);
    let detail = desk.evidence().get(&id).and_then(|request| {
        let files = desk.evidence().files(&id)?;
        Ok(json!({ "request": request, "files": files }))
    });
    respond(StatusCode::OK, detail)
}

pub(crate) async fn send_evidence_request(
    State(desk): State<Arc<ReviewDesk>>,
    Path(request_id): Path<String>,
    axum::Json(payload): axum::Json<ScopePayload>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.evidence().mark_sent(
            &payload.scope(),
            &EvidenceRequestId(request_id),
            Utc::now(),
        ),
    )
}

pub(crate) async fn complete_evidence_request(
    State(desk): State<Arc<ReviewDesk>>,
    Path(request_id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.evidence()
            .complete(&EvidenceRequestId(request_id), Utc::now()),
    )
}

pub(crate) async fn cancel_evidence_request(
    State(desk): State<Arc<ReviewDesk>>,
    Path(request_id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.evidence().cancel(&EvidenceRequestId(request_id), Utc::now()),
    )
}

pub(crate) async fn revoke_upload_token(
    State(desk): State<Arc<ReviewDesk>>,
    Path(request_id): Path<String>,
) -> Response {
    let revoked = desk
        .uploads()
        .revoke(&EvidenceRequestId(request_id), Utc::now())
        .map(|revoked| json!({ "revoked": revoked }));
    respond(StatusCode::OK, revoked)
}

pub(crate) async fn regenerate_upload_token(
    State(desk): State<Arc<ReviewDesk>>,
    Path(request_id): Path<String>,
    axum::Json(payload): axum::Json<ScopePayload>,
) -> Response {
    respond(
        StatusCode::CREATED,
        desk.uploads().regenerate(
            &payload.scope(),
            &EvidenceRequestId(request_id),
            Utc::now(),
        ),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct LinkFilePayload {
    finding_id: FindingId,
}

pub(crate) async fn link_evidence_file(
    State(desk): State<Arc<ReviewDesk>>,
    Path(file_id): Path<String>,
    axum::Json(payload): axum::Json<LinkFilePayload>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.link_evidence_file(&EvidenceFileId(file_id), &payload.finding_id, Utc::now()),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectFilePayload {
    #[serde(default)]
    reason: String,
}

pub(crate) async fn reject_evidence_file(
    State(desk): State<Arc<ReviewDesk>>,
    Path(file_id): Path<String>,
    axum::Json(payload): axum::Json<RejectFilePayload>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.evidence()
            .reject_file(&EvidenceFileId(file_id), &payload.reason),
    )
}

pub(crate) async fn upload_link_status(
    State(desk): State<Arc<ReviewDesk>>,
    Path(token): Path<String>,
) -> Response {
    match desk.uploads().check_status(&token, Utc::now()) {
        Ok(status) if status.valid => (StatusCode::OK, axum::Json(status)).into_response(),
        Ok(_) => error_response(ReviewError::InvalidToken),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadFilePayload {
    filename: String,
    #[serde(default)]
    mime_type: String,
    /// Standard base64 of the file bytes.
    content_base64: String,
    #[serde(default)]
    item_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadPayload {
    #[serde(default)]
    item_key: Option<String>,
    files: Vec<UploadFilePayload>,
}

pub(crate) async fn upload_files(
    State(desk): State<Arc<ReviewDesk>>,
    Path(token): Path<String>,
    axum::Json(payload): axum::Json<UploadPayload>,
) -> Response {
    let mut files = Vec::with_capacity(payload.files.len());
    for file in payload.files {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(file.content_base64.trim())
        {
            Ok(bytes) => bytes,
            Err(_) => {
                return error_response(ReviewError::validation(format!(
                    "{} is not valid base64 content",
                    file.filename
                )));
            }
        };
        files.push(IncomingFile {
            filename: file.filename,
            mime_type: file.mime_type,
            bytes,
            item_key: file.item_key,
        });
    }
    respond(
        StatusCode::OK,
        desk.uploads()
            .upload(&token, files, payload.item_key.as_deref(), Utc::now()),
    )
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct JobQuery {
    status: Option<JobStatus>,
    finding_id: Option<String>,
    request_id: Option<String>,
}

impl JobQuery {
    fn filter(self) -> Result<JobFilter, ReviewError> {
        let target = match (self.finding_id, self.request_id) {
            (Some(_), Some(_)) => {
                return Err(ReviewError::validation(
                    "filter by finding_id or request_id, not both",
                ));
            }
            (Some(finding_id), None) => Some(ReprocessTarget::Finding {
                finding_id: FindingId(finding_id),
            }),
            (None, Some(request_id)) => Some(ReprocessTarget::EvidenceRequest {
                request_id: EvidenceRequestId(request_id),
            }),
            (None, None) => None,
        };
        Ok(JobFilter {
            target,
            status: self.status,
        })
    }
}

pub(crate) async fn list_jobs(
    State(desk): State<Arc<ReviewDesk>>,
    Query(query): Query<JobQuery>,
) -> Response {
    let jobs = query
        .filter()
        .and_then(|filter| desk.reprocessing().list(&filter));
    respond(StatusCode::OK, jobs)
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnqueuePayload {
    target: ReprocessTarget,
}

pub(crate) async fn enqueue_job(
    State(desk): State<Arc<ReviewDesk>>,
    axum::Json(payload): axum::Json<EnqueuePayload>,
) -> Response {
    match desk.reprocessing().enqueue(payload.target, Utc::now()) {
        Ok(outcome @ EnqueueOutcome::Queued(_)) => {
            (StatusCode::ACCEPTED, axum::Json(outcome)).into_response()
        }
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn job_detail(
    State(desk): State<Arc<ReviewDesk>>,
    Path(job_id): Path<String>,
) -> Response {
    let detail = desk.reprocessing().get(&JobId(job_id)).map(|job| {
        let health = JobHealth::classify(&job, Utc::now(), desk.stall_ceiling());
        json!({ "job": job, "health": health })
    });
    respond(StatusCode::OK, detail)
}

pub(crate) async fn run_job(
    State(desk): State<Arc<ReviewDesk>>,
    Path(job_id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.reprocessing().run(&JobId(job_id), Utc::now()),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReadinessPayload {
    #[serde(flatten)]
    scope: ScopePayload,
    signals: ExternalSignals,
}

pub(crate) async fn assess_readiness(
    State(desk): State<Arc<ReviewDesk>>,
    axum::Json(payload): axum::Json<ReadinessPayload>,
) -> Response {
    respond(
        StatusCode::OK,
        desk.readiness()
            .assess(&payload.scope.scope(), payload.signals, Utc::now()),
    )
}
