//! Error types for the unread engine.

use huddle_core::CollaboratorError;

/// Result type alias for unread engine operations.
pub type Result<T> = std::result::Result<T, UnreadError>;

/// Errors surfaced by the unread engine.
///
/// Per-group collaborator failures never appear here: a tracker degrades its
/// own count to zero and retries. Only failures that leave no meaningful
/// aggregate (membership) or that a caller explicitly awaited (watermark
/// writes) are reported.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UnreadError {
    /// The membership subscription failed; the summary stream ends.
    #[error("Membership directory failed: {0}")]
    Membership(#[source] CollaboratorError),

    /// The membership subscription ended without an error.
    #[error("Membership subscription closed")]
    MembershipClosed,

    /// A watermark write kept failing until the retry budget ran out.
    #[error("Watermark write failed after {attempts} attempts: {source}")]
    WriteExhausted {
        attempts: u32,
        #[source]
        source: CollaboratorError,
    },

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UnreadError::Membership(CollaboratorError::PermissionDenied("u1".into()));
        assert!(err.to_string().contains("Membership directory failed"));
        assert!(err.to_string().contains("u1"));

        let err = UnreadError::WriteExhausted {
            attempts: 5,
            source: CollaboratorError::WriteFailed("conflict".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("5 attempts"));
        assert!(msg.contains("conflict"));

        assert!(UnreadError::Cancelled.to_string().contains("cancelled"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let err = UnreadError::Membership(CollaboratorError::Closed);
        assert!(err.source().is_some());
        assert!(UnreadError::MembershipClosed.source().is_none());
    }
}
