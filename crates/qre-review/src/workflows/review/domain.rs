use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author recorded on resolutions written by the reprocessing scheduler.
pub const SYSTEM_ACTOR: &str = "system";

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

identifier!(
    /// Organization (practice) owning the review data.
    OrganizationId,
    "org"
);
identifier!(ClientId, "cli");
identifier!(FindingId, "fnd");
identifier!(ResolutionId, "res");
identifier!(EvidenceRequestId, "evr");
identifier!(EvidenceFileId, "evf");
identifier!(
    /// Reprocessing job identifier.
    JobId,
    "job"
);

/// Explicit organization/client/tax-year context threaded through every call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewScope {
    pub organization_id: OrganizationId,
    pub client_id: ClientId,
    pub tax_year: i32,
}

impl ReviewScope {
    pub fn new(
        organization_id: impl Into<String>,
        client_id: impl Into<String>,
        tax_year: i32,
    ) -> Self {
        Self {
            organization_id: OrganizationId(organization_id.into()),
            client_id: ClientId(client_id.into()),
            tax_year,
        }
    }
}

/// Who performed a mutating action, when, and the key used to de-duplicate retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerAction {
    pub resolved_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub at: DateTime<Utc>,
}

impl ReviewerAction {
    pub fn new(resolved_by: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            resolved_by: resolved_by.into(),
            idempotency_key: None,
            at,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn system(idempotency_key: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(SYSTEM_ACTOR, at).with_idempotency_key(idempotency_key)
    }

    pub fn is_system(&self) -> bool {
        self.resolved_by == SYSTEM_ACTOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identifiers_carry_prefix_and_are_unique() {
        let first = FindingId::generate();
        let second = FindingId::generate();
        assert!(first.as_str().starts_with("fnd-"));
        assert_ne!(first, second);
        assert!(JobId::generate().to_string().starts_with("job-"));
    }

    #[test]
    fn identifiers_serialize_as_plain_strings() {
        let id = EvidenceRequestId::from("evr-1");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"evr-1\"");
    }
}
