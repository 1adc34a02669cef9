use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A short-lived record that issued a pair of one-time security codes.
///
/// ⚠️ `forward_code` and `backward_code` are bearer secrets. They are handed
/// out once by generation (or refresh) and must never be logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySession {
    /// Opaque id, assigned at creation and never changed.
    pub session_id: String,
    /// Keyed digest of the forward seed.
    pub forward_code: String,
    /// Keyed digest of the backward seed.
    pub backward_code: String,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
    /// The user the session is bound to. `None` means anonymous.
    pub user_id: Option<String>,
    /// Set once a validation accepted the codes.
    pub is_used: bool,
    /// Audit only.
    pub ip_address: String,
    /// Audit only.
    pub user_agent: String,
}

impl SecuritySession {
    /// Whether the session is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// The caller-facing view of the current code pair.
    pub fn codes(&self) -> SecurityCodes {
        SecurityCodes {
            session_id: self.session_id.clone(),
            forward_code: self.forward_code.clone(),
            backward_code: self.backward_code.clone(),
            expires_at: self.expires_at,
            user_id: self.user_id.clone(),
        }
    }
}

/// The codes returned to a caller by generation or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityCodes {
    pub session_id: String,
    pub forward_code: String,
    pub backward_code: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// The result of presenting a code pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<crate::error::SecurityRejection>,
}

impl ValidationOutcome {
    /// The codes were accepted and the session is now used.
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    /// The codes were refused for `reason`.
    pub fn rejected(reason: crate::error::SecurityRejection) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }

    /// Converts the outcome into a `Result`, for callers that propagate with `?`.
    pub fn into_result(self) -> crate::error::Result<()> {
        match self.reason {
            Some(reason) => Err(reason.into()),
            None => Ok(()),
        }
    }
}
