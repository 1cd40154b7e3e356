pub mod domain;
pub mod matching;
mod service;
pub mod templates;

pub use domain::{
    CompletionOutcome, EvidenceFile, EvidenceFileStatus, EvidenceRequest, EvidenceRequestFilter,
    EvidenceRequestStatus, NewEvidenceRequest, RequestType, RequestedItem, UploadChannel,
};
pub use service::{EvidenceRequestService, SentRequest};
