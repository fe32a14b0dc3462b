use thiserror::Error;

use crate::types::Capability;

#[derive(Debug, Error)]
pub enum AmigaError {
    // ── Registry errors ──────────────────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    #[error("username already taken: {0}")]
    DuplicateUsername(String),

    #[error("e-mail already registered: {0}")]
    DuplicateEmail(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ── Referral errors ──────────────────────────────────────────────────────
    #[error("a participant cannot refer itself")]
    SelfReferral,

    #[error("referral would create a cycle")]
    ReferralCycle,

    // ── Donation errors ──────────────────────────────────────────────────────
    #[error("no donation target available in your cycle yet; try again later")]
    NoTargetAvailable,

    #[error("concurrent update conflict after {attempts} attempts; retry")]
    ConcurrentUpdateConflict { attempts: u32 },

    // ── Auth errors ──────────────────────────────────────────────────────────
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("operation requires the {capability} capability")]
    PermissionDenied { capability: Capability },

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    /// Interrupted or timed-out storage I/O. Safe to run again.
    #[error("storage temporarily unavailable: {0}")]
    TransientPersistence(String),
}

impl AmigaError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AmigaError::ConcurrentUpdateConflict { .. } | AmigaError::TransientPersistence(_)
        )
    }
}

impl From<bincode::Error> for AmigaError {
    fn from(e: bincode::Error) -> Self {
        AmigaError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for AmigaError {
    fn from(e: serde_json::Error) -> Self {
        AmigaError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_and_transient_storage_are_retryable() {
        assert!(AmigaError::ConcurrentUpdateConflict { attempts: 5 }.is_retryable());
        assert!(AmigaError::TransientPersistence("interrupted".into()).is_retryable());
        assert!(!AmigaError::NoTargetAvailable.is_retryable());
        assert!(!AmigaError::Persistence("disk gone".into()).is_retryable());
    }

    #[test]
    fn permission_message_names_capability() {
        let err = AmigaError::PermissionDenied { capability: Capability::DeleteParticipant };
        assert_eq!(err.to_string(), "operation requires the delete_participant capability");
    }
}
