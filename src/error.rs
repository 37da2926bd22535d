//! Errors shared by the hook client and the reconciler.

use std::fmt;
use thiserror::Error;

/// Failure of a single call against the hook provider.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote provider unavailable: {0}")]
    Unavailable(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("hook configuration rejected: {0}")]
    ValidationRejected(String),

    #[error("hook not found")]
    NotFound,
}

impl RemoteError {
    /// Only outages are worth retrying; the reconciler itself never does.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Delete,
    Create,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::List => "list",
            Operation::Delete => "delete hook",
            Operation::Create => "create hook",
        })
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("reconciler used before initialize() completed")]
    NotSetup,

    #[error("{operation} {target} in {scope} failed: {source}")]
    Remote {
        operation: Operation,
        target: String,
        scope: String,
        #[source]
        source: RemoteError,
    },
}

impl ReconcileError {
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            ReconcileError::Remote { source, .. } => Some(source),
            ReconcileError::NotSetup => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_carries_operation_target_and_scope() {
        let err = ReconcileError::Remote {
            operation: Operation::Delete,
            target: "#42".into(),
            scope: "octo/hello".into(),
            source: RemoteError::Unavailable("connection reset".into()),
        };
        assert_eq!(
            err.to_string(),
            "delete hook #42 in octo/hello failed: remote provider unavailable: connection reset"
        );
        assert!(err.remote().unwrap().is_transient());
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(!RemoteError::Auth("bad token".into()).is_transient());
        assert!(!RemoteError::ValidationRejected("url".into()).is_transient());
        assert!(!RemoteError::NotFound.is_transient());
        assert!(ReconcileError::NotSetup.remote().is_none());
    }
}
