//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Campaign is already active.")]
    CampaignAlreadyActive,

    #[error("Cannot pause already paused campaign.")]
    CampaignAlreadyPaused,

    #[error("{0}")]
    CampaignAlreadyEnded(String),

    #[error("No contact remaining to call")]
    NoContactsRemaining,

    #[error("Insufficient credit")]
    InsufficientCredit,

    #[error("Provider rejected call: {message}")]
    ProviderCallFailed { code: Option<i32>, message: String },

    #[error("{0}")]
    FeatureDisabled(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid callback token: {0}")]
    InvalidCallbackToken(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Billing error: {0}")]
    Billing(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Control-command precondition violations are reported to the caller as-is
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DomainError::CampaignAlreadyActive
                | DomainError::CampaignAlreadyPaused
                | DomainError::CampaignAlreadyEnded(_)
                | DomainError::NoContactsRemaining
                | DomainError::FeatureDisabled(_)
        )
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::Cache(format!("Serialization error: {}", e))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for DomainError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => DomainError::NotFound("row".to_string()),
            other => DomainError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_errors() {
        assert!(DomainError::CampaignAlreadyActive.is_precondition());
        assert!(DomainError::CampaignAlreadyEnded("x".into()).is_precondition());
        assert!(!DomainError::InsufficientCredit.is_precondition());
        assert!(!DomainError::Database("boom".into()).is_precondition());
    }

    #[test]
    fn test_ended_message_is_verbatim() {
        let err = DomainError::CampaignAlreadyEnded("Cannot re-start completed campaign.".into());
        assert_eq!(err.to_string(), "Cannot re-start completed campaign.");
    }
}
