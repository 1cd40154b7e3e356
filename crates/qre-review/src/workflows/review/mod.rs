//! Review and evidence resolution for QRE studies.
//!
//! Compliance rules raise findings against entity snapshots; reviewers resolve them through an
//! append-only audit trail; clients answer evidence requests through tokenized upload links;
//! reprocessing re-evaluates findings once evidence lands; readiness rolls everything up.

mod desk;
pub mod domain;
pub mod error;
pub mod evidence;
pub mod findings;
pub mod memory;
pub mod readiness;
pub mod repository;
pub mod reprocessing;
pub mod resolution;
pub mod router;
pub mod settings;
pub mod upload;

#[cfg(test)]
mod tests;

pub use desk::{LinkedEvidenceFile, ReviewBackends, ReviewDesk};
pub use domain::{
    ClientId, EvidenceFileId, EvidenceRequestId, FindingId, JobId, OrganizationId, ResolutionId,
    ReviewScope, ReviewerAction, SYSTEM_ACTOR,
};
pub use error::ReviewError;
pub use memory::{MemoryBlobStore, MemoryReviewStore, StaticDirectory};
pub use repository::RepositoryError;
pub use router::review_router;
pub use settings::{OrganizationDirectory, OrganizationSettings};
