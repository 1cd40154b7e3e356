pub mod domain;
mod engine;
pub mod rules;

pub use domain::{
    AuthorityReference, EntityRef, EntitySnapshot, EntityType, EstimatedImpact, Finding,
    FindingDomain, FindingFilter, FindingStatus, LinkedEvidence, Severity,
};
pub use engine::{FindingDetail, FindingsEngine};
pub use rules::{ComplianceRule, RuleCatalog, RuleError, RuleTrigger};
