//! Review and evidence resolution workflow for QRE tax-credit studies.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
