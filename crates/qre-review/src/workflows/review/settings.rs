use serde::{Deserialize, Serialize};

use super::domain::{ClientId, OrganizationId};
use super::repository::RepositoryError;

const DEFAULT_TOKEN_EXPIRATION_DAYS: u32 = 14;
const DEFAULT_TOKEN_UPLOAD_LIMIT: u32 = 20;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

/// Per-organization thresholds and feature flags, loaded once per operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationSettings {
    pub wage_outlier_threshold: f64,
    pub large_tx_threshold: f64,
    pub allocation_min_pct: f64,
    pub allocation_max_pct: f64,
    pub senior_required_credit_at_risk: f64,
    pub senior_required_qre_at_risk: f64,
    pub evidence_token_expiration_days: u32,
    pub evidence_token_upload_limit: u32,
    pub max_upload_bytes: u64,
    /// Effective credit rate applied to QRE at risk when estimating credit exposure.
    pub credit_rate: f64,
    pub block_finalize_with_open_high_findings: bool,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            wage_outlier_threshold: 250_000.0,
            large_tx_threshold: 50_000.0,
            allocation_min_pct: 5.0,
            allocation_max_pct: 95.0,
            senior_required_credit_at_risk: 25_000.0,
            senior_required_qre_at_risk: 250_000.0,
            evidence_token_expiration_days: DEFAULT_TOKEN_EXPIRATION_DAYS,
            evidence_token_upload_limit: DEFAULT_TOKEN_UPLOAD_LIMIT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            credit_rate: 0.065,
            block_finalize_with_open_high_findings: true,
        }
    }
}

impl OrganizationSettings {
    /// Expiration window for freshly issued upload tokens; zero falls back to the default.
    pub fn token_expiration_days(&self) -> u32 {
        if self.evidence_token_expiration_days == 0 {
            DEFAULT_TOKEN_EXPIRATION_DAYS
        } else {
            self.evidence_token_expiration_days
        }
    }

    pub fn allocation_within_bounds(&self, pct: f64) -> bool {
        pct >= self.allocation_min_pct && pct <= self.allocation_max_pct
    }
}

/// Read-only organization collaborator supplying settings and client display names.
pub trait OrganizationDirectory: Send + Sync {
    fn settings(&self, organization_id: &OrganizationId)
        -> Result<OrganizationSettings, RepositoryError>;

    fn client_name(&self, client_id: &ClientId) -> Result<Option<String>, RepositoryError>;

    fn organization_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<OrganizationId>, RepositoryError>;

    /// Settings for the organization owning `client_id`, or defaults when the client is unknown.
    fn settings_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<OrganizationSettings, RepositoryError> {
        match self.organization_for_client(client_id)? {
            Some(organization_id) => self.settings(&organization_id),
            None => Ok(OrganizationSettings::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_expiration_falls_back_to_fourteen_days() {
        let settings = OrganizationSettings {
            evidence_token_expiration_days: 0,
            ..OrganizationSettings::default()
        };
        assert_eq!(settings.token_expiration_days(), 14);
    }

    #[test]
    fn partial_payload_fills_defaults() {
        let settings: OrganizationSettings =
            serde_json::from_str(r#"{"large_tx_threshold": 1000.0}"#).expect("deserialize");
        assert_eq!(settings.large_tx_threshold, 1000.0);
        assert_eq!(settings.evidence_token_expiration_days, 14);
        assert!(settings.allocation_within_bounds(50.0));
        assert!(!settings.allocation_within_bounds(99.0));
    }
}
