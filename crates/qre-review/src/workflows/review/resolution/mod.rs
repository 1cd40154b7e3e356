pub mod domain;
pub mod gating;
mod manager;
pub mod transitions;

pub use domain::{EntityPatch, FieldChange, Resolution, ResolutionCommit, ResolutionType};
pub use gating::{finalization_blockers, requires_senior_escalation, FinalizationBlocker};
pub use manager::{ResolutionManager, ResolutionReceipt};
pub use transitions::ResolutionAction;
