// shared/src/lib.rs

/// Failure reported by the remote catalogue collaborator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("not found")]
    NotFound,
    #[error("unauthorised")]
    Unauthorised,
    #[error("unknown: {0}")]
    Unknown(String),
}

/// Failure of the local persistence layer. Never used to signal a cache miss.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("store closed")]
    Closed,
}

/// The error taxonomy every repository surfaces to its callers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,
    #[error("unauthorised")]
    Unauthorised,
    #[error("unknown: {0}")]
    Unknown(String),
}

impl From<RemoteError> for RepositoryError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound => RepositoryError::NotFound,
            RemoteError::Unauthorised => RepositoryError::Unauthorised,
            RemoteError::Unknown(cause) => RepositoryError::Unknown(cause),
        }
    }
}

impl From<StoreError> for RepositoryError {
    fn from(err: StoreError) -> Self {
        RepositoryError::Unknown(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, RepositoryError>;

pub mod config;
