//! Error types for Huddle collaborators

use thiserror::Error;

/// Errors reported by the collaborators the unread engine consumes
///
/// Values of this type travel inside subscription streams, where a single
/// failure may be fanned out to every live listener, so it is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Subscription closed")]
    Closed,
}

impl CollaboratorError {
    /// Whether the failure may clear up without outside action.
    ///
    /// A missing subject (deleted group) or a permission failure is
    /// permanent until membership changes.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::WriteFailed(_) | Self::Closed)
    }
}

/// Errors related to document identifiers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Empty {kind} id")]
    Empty { kind: &'static str },

    #[error("Invalid {kind} id {value:?}: {reason}")]
    Invalid {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Result type alias for collaborator operations
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_display() {
        let err = CollaboratorError::NotFound("group g1".to_string());
        assert!(format!("{}", err).contains("Not found"));
        assert!(format!("{}", err).contains("g1"));

        let err = CollaboratorError::PermissionDenied("watermarks".to_string());
        assert!(format!("{}", err).contains("Permission denied"));

        assert!(format!("{}", CollaboratorError::Closed).contains("closed"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CollaboratorError::Unavailable("timeout".into()).is_transient());
        assert!(CollaboratorError::WriteFailed("conflict".into()).is_transient());
        assert!(CollaboratorError::Closed.is_transient());
        assert!(!CollaboratorError::NotFound("g".into()).is_transient());
        assert!(!CollaboratorError::PermissionDenied("g".into()).is_transient());
    }

    #[test]
    fn test_identity_error_display() {
        let err = IdentityError::Empty { kind: "group" };
        assert_eq!(format!("{}", err), "Empty group id");

        let err = IdentityError::Invalid {
            kind: "user",
            value: "a/b".to_string(),
            reason: "contains '/'",
        };
        let msg = format!("{}", err);
        assert!(msg.contains("a/b"));
        assert!(msg.contains("contains '/'"));
    }
}
