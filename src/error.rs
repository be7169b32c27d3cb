use crate::types::{DeliveryStatus, RecordId};

/// Why an inbound delivery was not verified.
///
/// Carried inside [`crate::Verification::Rejected`]; the verifier never
/// returns these as errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("no secret configured for provider")]
    MissingSecret,

    #[error("signature header missing")]
    MissingSignature,

    #[error("timestamp missing")]
    MissingTimestamp,

    #[error("signature header malformed")]
    MalformedHeader,

    #[error("timestamp is not a number")]
    InvalidTimestamp,

    #[error("timestamp outside tolerance")]
    StaleTimestamp,

    #[error("signature mismatch")]
    InvalidSignature,

    #[error("body is not valid JSON")]
    MalformedBody,

    #[error("topic could not be determined")]
    MissingTopic,
}

/// Errors raised by a record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(RecordId),

    #[error("invalid transition {from} -> {to} for record {id}")]
    InvalidTransition {
        id: RecordId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("retry limit reached ({retry_count}) for record {id}")]
    RetryLimit { id: RecordId, retry_count: u32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend could not be reached or rejected the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by [`crate::Pipeline::ingest`] before dispatch runs.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Verification failed; nothing was recorded.
    #[error("delivery rejected: {0}")]
    Rejected(RejectReason),

    /// The initial `pending` record could not be written.
    #[error("failed to record delivery: {0}")]
    Recording(#[source] StoreError),
}

/// Errors returned by [`crate::RetryCoordinator::retry`].
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("record not found: {0}")]
    NotFound(RecordId),

    #[error("retry limit reached for record {id} (retry_count = {retry_count})")]
    Exhausted { id: RecordId, retry_count: u32 },

    #[error("record {id} is {status} and cannot be retried")]
    NotRetryable { id: RecordId, status: DeliveryStatus },

    /// Stored provider string no longer maps to a known provider.
    #[error("record {id} has unknown provider {provider:?}")]
    UnknownProvider { id: RecordId, provider: String },

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for RetryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => RetryError::NotFound(id),
            StoreError::RetryLimit { id, retry_count } => RetryError::Exhausted { id, retry_count },
            StoreError::InvalidTransition { id, from, .. } => {
                RetryError::NotRetryable { id, status: from }
            }
            other => RetryError::Storage(other),
        }
    }
}

/// Error type returned by business handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by outcome observers.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;
