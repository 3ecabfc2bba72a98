use thiserror::Error;

/// Failures reported by a [`crate::LedgerStore`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Another writer holds the lock; the whole transaction may be retried.
    #[error("store transaction conflict: {0}")]
    Conflict(String),
    #[error("store call timed out after {0} ms")]
    Timeout(u64),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("ledger entry not found: {0}")]
    NotFound(String),
    #[error("ledger entry total would overflow for entry {0}")]
    Overflow(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("notification authentication failed: {0}")]
    Authentication(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("transaction conflict persisted after retry: {0}")]
    TransactionConflict(String),
    #[error("store call timed out after {0} ms")]
    StoreTimeout(u64),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("ledger entry not found: {0}")]
    EntryNotFound(String),
}

impl LedgerError {
    /// Whether the payment collaborator should redeliver the notification.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransactionConflict(_) | Self::StoreTimeout(_) | Self::StoreUnavailable(_)
        )
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(detail) => Self::TransactionConflict(detail),
            StoreError::Timeout(ms) => Self::StoreTimeout(ms),
            StoreError::Unavailable(detail) => Self::StoreUnavailable(detail),
            StoreError::NotFound(id) => Self::EntryNotFound(id),
            StoreError::Overflow(id) => {
                Self::MalformedEvent(format!("amount overflows the total of entry {id}"))
            }
        }
    }
}
