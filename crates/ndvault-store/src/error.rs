//! Store error taxonomy.

use std::io;
use std::path::PathBuf;

use ndvault_config::{log_store_error, log_store_warn};
use ndvault_container::ContainerError;
use thiserror::Error;

/// Coarse classification of every [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    BrokenReference,
    Validation,
    MemoryLimitExceeded,
    Storage,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The parent virtual array of an array being created does not exist
    #[error("Virtual array {vid} does not exist")]
    MissingParent { vid: String },

    #[error("Link record {} points at a missing target", link.display())]
    BrokenReference { link: PathBuf },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Schema needs {required} bytes per array, limit is {limit}")]
    MemoryLimitExceeded { required: u64, limit: u64 },

    #[error("Storage failure: {0}")]
    Storage(#[source] ContainerError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::NotFound(_) | StoreError::MissingParent { .. } => ErrorKind::NotFound,
            StoreError::BrokenReference { .. } => ErrorKind::BrokenReference,
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::MemoryLimitExceeded { .. } => ErrorKind::MemoryLimitExceeded,
            StoreError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Constraint violations are logged as warnings, the rest as errors.
    pub(crate) fn is_constraint(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Storage)
    }
}

impl From<ContainerError> for StoreError {
    fn from(e: ContainerError) -> Self {
        match e {
            ContainerError::AlreadyExists { path } => {
                StoreError::AlreadyExists(format!("container {}", path.display()))
            }
            ContainerError::NotFound { path } => {
                StoreError::NotFound(format!("container {}", path.display()))
            }
            ContainerError::MissingMetadata { path } => {
                StoreError::NotFound(format!("metadata slot of {}", path.display()))
            }
            ContainerError::Validation(msg) | ContainerError::OutOfBounds(msg) => {
                StoreError::Validation(msg)
            }
            other => StoreError::Storage(other),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Storage(ContainerError::Io(e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Storage(ContainerError::Json(e))
    }
}

impl From<walkdir::Error> for StoreError {
    fn from(e: walkdir::Error) -> Self {
        StoreError::from(io::Error::from(e))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Log a failed store operation once, on its way out.
pub(crate) fn logged<T>(op: &'static str, target: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if e.is_constraint() {
            log_store_warn!("Operation rejected", op = op, target = target, error = tracing::field::display(e));
        } else {
            log_store_error!("Operation failed", op = op, target = target, error = tracing::field::display(e));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_errors_map_to_taxonomy() {
        let missing: StoreError = ContainerError::MissingMetadata {
            path: PathBuf::from("/x.ndv"),
        }
        .into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let bounds: StoreError = ContainerError::OutOfBounds("axis 0".into()).into();
        assert_eq!(bounds.kind(), ErrorKind::Validation);

        let corrupt: StoreError = ContainerError::Corrupt("bad magic".into()).into();
        assert_eq!(corrupt.kind(), ErrorKind::Storage);
        assert!(!corrupt.is_constraint());
    }

    #[test]
    fn test_missing_parent_is_not_found() {
        let err = StoreError::MissingParent { vid: "v1".into() };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("v1"));
    }

    #[test]
    fn test_io_error_is_storage() {
        let err: StoreError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
