use quota_storage::StorageError;
use quota_types::{ErrorKind, QuotaError};
use thiserror::Error;

/// Errors returned by [`crate::Protocol`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Rejected(#[from] QuotaError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("protocol state already exists")]
    AlreadyInitialized,

    #[error("no protocol state found, run genesis first")]
    NotInitialized,

    #[error("persisted state is missing section '{0}'")]
    MissingSection(String),
}

impl ProtocolError {
    /// Kind of the underlying rejection, if the engines rejected the operation.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ProtocolError::Rejected(err) => Some(err.kind()),
            _ => None,
        }
    }
}

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
