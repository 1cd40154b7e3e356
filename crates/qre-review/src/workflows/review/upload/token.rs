use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use super::super::domain::EvidenceRequestId;
use super::super::error::ReviewError;
use super::super::repository::TokenRepository;
use super::super::settings::OrganizationSettings;

const TOKEN_BYTES: usize = 32;

/// Stored upload credential. Only the SHA-256 of the token value is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadToken {
    pub request_id: EvidenceRequestId,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub uploads_remaining: u32,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl UploadToken {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

/// Plaintext token handed to the caller exactly once, at issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub request_id: EvidenceRequestId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub uploads_remaining: u32,
}

/// Outcome of an atomic quota decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaReservation {
    Reserved { remaining: u32 },
    Exhausted,
    Inactive,
}

pub fn generate_token_value() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_token(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Expiration instant for a token issued at `now`, rejecting windows past the calendar range.
pub fn token_expiry(
    settings: &OrganizationSettings,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ReviewError> {
    let days = settings.token_expiration_days();
    Duration::try_days(i64::from(days))
        .and_then(|window| now.checked_add_signed(window))
        .ok_or_else(|| {
            ReviewError::validation(format!(
                "evidence_token_expiration_days of {days} is out of range"
            ))
        })
}

/// Issues, validates, and revokes upload tokens while keeping one active token per request.
pub struct TokenIssuer {
    tokens: Arc<dyn TokenRepository>,
}

impl TokenIssuer {
    pub fn new(tokens: Arc<dyn TokenRepository>) -> Self {
        Self { tokens }
    }

    /// Issue a fresh token, revoking the previous one in the same repository step.
    pub fn regenerate(
        &self,
        request_id: &EvidenceRequestId,
        settings: &OrganizationSettings,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, ReviewError> {
        let expires_at = token_expiry(settings, now)?;
        let value = generate_token_value();
        let record = UploadToken {
            request_id: request_id.clone(),
            token_hash: hash_token(&value),
            issued_at: now,
            expires_at,
            uploads_remaining: settings.evidence_token_upload_limit,
            revoked_at: None,
        };
        let uploads_remaining = record.uploads_remaining;

        let previous = self.tokens.issue(record, now)?;
        info!(
            request_id = %request_id,
            revoked_previous = previous.is_some(),
            %expires_at,
            "issued evidence upload token"
        );

        Ok(IssuedToken {
            request_id: request_id.clone(),
            token: value,
            expires_at,
            uploads_remaining,
        })
    }

    /// Revoke the active token for a request. Returns whether a token was active.
    pub fn revoke(
        &self,
        request_id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<bool, ReviewError> {
        let revoked = self.tokens.revoke(request_id, now)?;
        if revoked.is_some() {
            info!(request_id = %request_id, "revoked evidence upload token");
        }
        Ok(revoked.is_some())
    }

    /// Resolve a presented token to its active record. Unknown, expired, and revoked tokens
    /// are indistinguishable to the caller.
    pub fn validate(&self, value: &str, now: DateTime<Utc>) -> Result<UploadToken, ReviewError> {
        if value.trim().is_empty() {
            return Err(ReviewError::InvalidToken);
        }
        match self.tokens.find_by_hash(&hash_token(value))? {
            Some(token) if token.is_active(now) => Ok(token),
            _ => Err(ReviewError::InvalidToken),
        }
    }

    pub fn active_for_request(
        &self,
        request_id: &EvidenceRequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadToken>, ReviewError> {
        Ok(self.tokens.active_for_request(request_id, now)?)
    }

    /// Take one unit of upload quota in a single conditional update.
    pub fn consume(
        &self,
        token: &UploadToken,
        now: DateTime<Utc>,
    ) -> Result<QuotaReservation, ReviewError> {
        Ok(self.tokens.try_consume(&token.token_hash, now)?)
    }

    pub fn release(&self, token: &UploadToken) -> Result<(), ReviewError> {
        Ok(self.tokens.release(&token.token_hash)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_values_are_url_safe_and_unique() {
        let first = generate_token_value();
        let second = generate_token_value();
        assert_ne!(first, second);
        assert_eq!(first.len(), 43);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn hash_is_stable_hex_and_ignores_surrounding_whitespace() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("  abc\n"));
        assert_ne!(hash, hash_token("abd"));
    }

    #[test]
    fn expiry_follows_the_configured_window() {
        let now = Utc::now();
        let settings = OrganizationSettings::default();
        assert_eq!(
            token_expiry(&settings, now).expect("in range"),
            now + Duration::days(14)
        );

        let unbounded = OrganizationSettings {
            evidence_token_expiration_days: u32::MAX,
            ..OrganizationSettings::default()
        };
        assert!(matches!(
            token_expiry(&unbounded, now),
            Err(ReviewError::Validation(_))
        ));
    }

    #[test]
    fn expired_or_revoked_tokens_are_inactive() {
        let now = Utc::now();
        let mut token = UploadToken {
            request_id: EvidenceRequestId::from("evr-1"),
            token_hash: hash_token("abc"),
            issued_at: now - Duration::days(15),
            expires_at: now - Duration::days(1),
            uploads_remaining: 5,
            revoked_at: None,
        };
        assert!(!token.is_active(now));
        token.expires_at = now + Duration::days(1);
        assert!(token.is_active(now));
        token.revoked_at = Some(now);
        assert!(!token.is_active(now));
    }
}
