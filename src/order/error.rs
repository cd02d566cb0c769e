use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    /// The request can never succeed as given; not retried.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{operation} gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrderError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Validation(_) | Self::RetriesExhausted { .. } => false,
        }
    }
}
