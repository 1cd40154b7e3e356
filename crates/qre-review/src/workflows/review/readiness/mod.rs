mod export;
pub mod scorer;
mod service;
pub mod views;

pub use export::{write_worklist_csv, WorklistExportError};
pub use scorer::{score, ReadinessInputs};
pub use service::ReadinessService;
pub use views::{
    BlockerKind, BlockerView, ExternalSignals, NextAction, ReadinessReport, RiskFlagView,
    RiskKind,
};
