use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::super::domain::{EvidenceFileId, EvidenceRequestId, ReviewScope};
use super::super::error::ReviewError;
use super::super::evidence::domain::{
    EvidenceFile, EvidenceFileStatus, EvidenceRequest, EvidenceRequestStatus, RequestedItem,
    UploadChannel,
};
use super::super::evidence::matching::assign_item_key;
use super::super::evidence::EvidenceRequestService;
use super::super::repository::BlobStore;
use super::token::{IssuedToken, QuotaReservation, TokenIssuer, UploadToken};
use super::validation::{validate_file, FileRejection};

/// One file in a client upload batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    /// Overrides the batch-level item key for this file.
    pub item_key: Option<String>,
}

impl IncomingFile {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes,
            item_key: None,
        }
    }

    pub fn for_item(mut self, item_key: impl Into<String>) -> Self {
        self.item_key = Some(item_key.into());
        self
    }
}

/// What the client portal shows for a link. Invalid links carry `valid: false` and nothing else.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenStatus {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_items: Option<Vec<RequestedItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads_remaining: Option<u32>,
}

impl TokenStatus {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            client_name: None,
            title: None,
            requested_items: None,
            due_date: None,
            uploads_remaining: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedFile {
    pub filename: String,
    pub message: String,
    pub reason: FileRejection,
}

impl RejectedFile {
    fn new(filename: &str, reason: FileRejection) -> Self {
        Self {
            filename: filename.to_string(),
            message: reason.to_string(),
            reason,
        }
    }
}

/// Partial-success result of an upload batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReceipt {
    pub uploaded: Vec<EvidenceFile>,
    pub rejected: Vec<RejectedFile>,
    pub uploads_remaining: u32,
    pub request_status: EvidenceRequestStatus,
}

/// Credential-free client surface. The token is the only authority the caller presents.
pub struct UploadTokenGateway {
    tokens: Arc<TokenIssuer>,
    evidence: Arc<EvidenceRequestService>,
    blobs: Arc<dyn BlobStore>,
}

impl UploadTokenGateway {
    pub fn new(
        tokens: Arc<TokenIssuer>,
        evidence: Arc<EvidenceRequestService>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            tokens,
            evidence,
            blobs,
        }
    }

    pub fn check_status(&self, token: &str, now: DateTime<Utc>) -> Result<TokenStatus, ReviewError> {
        let (record, request) = match self.authorize(token, now) {
            Ok(found) => found,
            Err(ReviewError::InvalidToken) => return Ok(TokenStatus::invalid()),
            Err(other) => return Err(other),
        };
        self.evidence.note_link_opened(&request, now)?;

        let client_name = self
            .evidence
            .directory()
            .client_name(&request.client_id)?;
        Ok(TokenStatus {
            valid: true,
            client_name,
            title: Some(request.title),
            requested_items: Some(request.requested_items),
            due_date: request.due_date,
            uploads_remaining: Some(record.uploads_remaining),
        })
    }

    /// Validate and store each file independently. Accepted files consume one unit of quota
    /// each; once the quota is gone the rest of the batch is rejected.
    pub fn upload(
        &self,
        token: &str,
        files: Vec<IncomingFile>,
        item_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UploadReceipt, ReviewError> {
        let (record, request) = self.authorize(token, now)?;
        if record.uploads_remaining == 0 {
            return Err(ReviewError::QuotaExceeded);
        }
        if files.is_empty() {
            return Err(ReviewError::validation("at least one file is required"));
        }

        let settings = self
            .evidence
            .directory()
            .settings_for_client(&request.client_id)?;
        let mut uploaded = Vec::new();
        let mut rejected = Vec::new();
        let mut remaining = record.uploads_remaining;

        for file in files {
            let requested = file.item_key.as_deref().or(item_key);
            let assigned = assign_item_key(&request, requested);
            let accepted = match validate_file(
                &request,
                &file.filename,
                &file.mime_type,
                file.bytes.len() as u64,
                requested,
                assigned,
                settings.max_upload_bytes,
            ) {
                Ok(accepted) => accepted,
                Err(reason) => {
                    warn!(request_id = %request.id, %reason, "rejected uploaded file");
                    rejected.push(RejectedFile::new(&file.filename, reason));
                    continue;
                }
            };

            let file_id = EvidenceFileId::generate();
            let storage_key = format!("evidence/{}/{}.{}", request.id, file_id, accepted.extension);
            if let Err(error) = self.blobs.put(&storage_key, &file.bytes) {
                warn!(request_id = %request.id, %error, "failed to store uploaded file");
                rejected.push(RejectedFile::new(&file.filename, FileRejection::StorageFailed));
                continue;
            }

            match self.tokens.consume(&record, now) {
                Ok(QuotaReservation::Reserved { remaining: left }) => remaining = left,
                Ok(QuotaReservation::Exhausted | QuotaReservation::Inactive) => {
                    self.discard_blob(&storage_key);
                    remaining = 0;
                    rejected.push(RejectedFile::new(&file.filename, FileRejection::QuotaExceeded));
                    continue;
                }
                Err(error) => {
                    warn!(request_id = %request.id, %error, "failed to reserve upload quota");
                    self.discard_blob(&storage_key);
                    rejected.push(RejectedFile::new(&file.filename, FileRejection::StorageFailed));
                    continue;
                }
            }

            uploaded.push(EvidenceFile {
                id: file_id,
                request_id: request.id.clone(),
                original_filename: file.filename,
                mime_type: accepted.mime_type,
                size_bytes: file.bytes.len() as u64,
                status: EvidenceFileStatus::Uploaded,
                uploaded_via: UploadChannel::ClientLink,
                item_key: accepted.item_key,
                finding_id: None,
                storage_key,
                rejection_reason: None,
                uploaded_at: now,
            });
        }

        if let Err(error) = self.evidence.append_files(uploaded.clone()) {
            for file in &uploaded {
                if let Err(release_error) = self.tokens.release(&record) {
                    warn!(
                        request_id = %request.id,
                        error = %release_error,
                        "failed to return upload quota"
                    );
                }
                self.discard_blob(&file.storage_key);
            }
            return Err(error);
        }
        let updated = if uploaded.is_empty() {
            request
        } else {
            self.evidence.refresh_status(&request.id, now)?
        };

        info!(
            request_id = %updated.id,
            accepted = uploaded.len(),
            rejected = rejected.len(),
            uploads_remaining = remaining,
            status = updated.status.label(),
            "processed evidence upload batch"
        );
        Ok(UploadReceipt {
            uploaded,
            rejected,
            uploads_remaining: remaining,
            request_status: updated.status,
        })
    }

    pub fn revoke(
        &self,
        request_id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<bool, ReviewError> {
        self.evidence.revoke_token(request_id, now)
    }

    pub fn regenerate(
        &self,
        scope: &ReviewScope,
        request_id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, ReviewError> {
        self.evidence.regenerate_token(scope, request_id, now)
    }

    /// Resolve a token to its request. Anything short of an active token on a request that is
    /// still collecting files is reported as the same generic `InvalidToken`.
    fn authorize(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(UploadToken, EvidenceRequest), ReviewError> {
        let record = self.tokens.validate(token, now)?;
        let request = match self.evidence.get(&record.request_id) {
            Ok(request) => request,
            Err(ReviewError::NotFound { .. }) => return Err(ReviewError::InvalidToken),
            Err(other) => return Err(other),
        };
        if !request.status.accepts_uploads() {
            return Err(ReviewError::InvalidToken);
        }
        Ok((record, request))
    }

    fn discard_blob(&self, storage_key: &str) {
        if let Err(error) = self.blobs.delete(storage_key) {
            warn!(storage_key, %error, "failed to delete orphaned upload");
        }
    }
}
