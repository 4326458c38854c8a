use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsageError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] validator::ValidationErrors),

    #[error("Invalid group_by: {0}")]
    InvalidGroupBy(String),

    #[error("Unsupported aggregation type: {0}")]
    UnsupportedAggregation(String),

    #[error("Store error during {operation} ({context}): {source}")]
    Store {
        operation: &'static str,
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Batch {batch_index} failed after {flushed_rows} rows were flushed: {source}")]
    BatchFailed {
        batch_index: usize,
        flushed_rows: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl UsageError {
    pub fn store(operation: &'static str, context: impl Into<String>, source: anyhow::Error) -> Self {
        UsageError::Store {
            operation,
            context: context.into(),
            source,
        }
    }

    /// Label used for the error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            UsageError::Validation(_) => "validation",
            UsageError::InvalidEvent(_) => "invalid_event",
            UsageError::InvalidGroupBy(_) => "invalid_group_by",
            UsageError::UnsupportedAggregation(_) => "unsupported_aggregation",
            UsageError::Store { .. } => "store",
            UsageError::BatchFailed { .. } => "batch_failed",
        }
    }
}

impl From<UsageError> for AppError {
    fn from(err: UsageError) -> Self {
        match err {
            UsageError::InvalidEvent(e) => AppError::ValidationError(e),
            UsageError::Validation(e)
            | UsageError::InvalidGroupBy(e)
            | UsageError::UnsupportedAggregation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            e @ UsageError::Store { .. } => AppError::DatabaseError(anyhow::Error::new(e)),
            e @ UsageError::BatchFailed { .. } => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}
