use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{ClientId, EvidenceFileId, EvidenceRequestId, FindingId};

/// Request lifecycle. Status only moves forward, except for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceRequestStatus {
    Draft,
    Sent,
    AwaitingUpload,
    PartiallyReceived,
    Received,
    Completed,
    Cancelled,
}

impl EvidenceRequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::AwaitingUpload => "awaiting_upload",
            Self::PartiallyReceived => "partially_received",
            Self::Received => "received",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Position along the forward path; cancellation sits outside it.
    pub const fn rank(self) -> Option<u8> {
        match self {
            Self::Draft => Some(0),
            Self::Sent => Some(1),
            Self::AwaitingUpload => Some(2),
            Self::PartiallyReceived => Some(3),
            Self::Received => Some(4),
            Self::Completed => Some(5),
            Self::Cancelled => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub const fn accepts_uploads(self) -> bool {
        matches!(
            self,
            Self::Sent | Self::AwaitingUpload | Self::PartiallyReceived | Self::Received
        )
    }

    /// Whether moving to `next` keeps the status monotonic.
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(target)) => target >= current,
            (None, Some(_)) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    VendorContract,
    PayrollSupport,
    TimeAllocation,
    ExpenseSupport,
    General,
}

impl RequestType {
    pub const fn label(self) -> &'static str {
        match self {
            RequestType::VendorContract => "vendor_contract",
            RequestType::PayrollSupport => "payroll_support",
            RequestType::TimeAllocation => "time_allocation",
            RequestType::ExpenseSupport => "expense_support",
            RequestType::General => "general",
        }
    }
}

/// One line of the checklist the client sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedItem {
    pub item_key: String,
    pub label: String,
    pub required: bool,
    pub accepted_formats: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRequest {
    pub id: EvidenceRequestId,
    pub client_id: ClientId,
    pub tax_year: i32,
    pub request_type: RequestType,
    pub status: EvidenceRequestStatus,
    pub title: String,
    pub reason: String,
    pub requested_items: Vec<RequestedItem>,
    pub email_draft: String,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub linked_finding_ids: Vec<FindingId>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvidenceRequest {
    pub fn required_items(&self) -> impl Iterator<Item = &RequestedItem> {
        self.requested_items.iter().filter(|item| item.required)
    }

    pub fn item(&self, item_key: &str) -> Option<&RequestedItem> {
        self.requested_items
            .iter()
            .find(|item| item.item_key == item_key)
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.status.is_terminal() && self.due_date.map_or(false, |due| due < today)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceFileStatus {
    Uploaded,
    Linked,
    Processed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadChannel {
    ClientLink,
    Portal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceFile {
    pub id: EvidenceFileId,
    pub request_id: EvidenceRequestId,
    pub original_filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub status: EvidenceFileStatus,
    pub uploaded_via: UploadChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_key: Option<String>,
    /// Set exactly when the file is linked to (or processed for) one finding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding_id: Option<FindingId>,
    pub storage_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Caller input for `EvidenceRequestService::create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEvidenceRequest {
    #[serde(default)]
    pub request_type: Option<RequestType>,
    pub reason: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub linked_finding_ids: Vec<FindingId>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRequestFilter {
    #[serde(default)]
    pub client_id: Option<ClientId>,
    #[serde(default)]
    pub tax_year: Option<i32>,
    #[serde(default)]
    pub status: Option<EvidenceRequestStatus>,
}

impl EvidenceRequestFilter {
    pub fn matches(&self, request: &EvidenceRequest) -> bool {
        self.client_id
            .as_ref()
            .map_or(true, |client_id| &request.client_id == client_id)
            && self.tax_year.map_or(true, |year| request.tax_year == year)
            && self.status.map_or(true, |status| request.status == status)
    }
}

/// Result of an explicit completion attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed { request: EvidenceRequest },
    Blocked { blockers: Vec<String> },
}

/// Blocker reported when no file has been received at all.
pub const NO_FILES_BLOCKER: &str = "no_files_received";
