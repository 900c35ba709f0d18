//! Error types shared by NutriBaby services.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, NutriBabyError>;

/// Top-level error taxonomy.
#[derive(Debug, Error)]
pub enum NutriBabyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    /// No renderer registered for an event kind. Never retried.
    #[error("No renderer registered for event kind '{0}'")]
    RendererMissing(String),

    #[error("No live authorization for caregiver {caregiver_id} ({template_kind})")]
    NoTokenAvailable {
        caregiver_id: String,
        template_kind: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A tick task died without producing a report (panic or abort).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome classes of a failed push call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Recoverable failure: timeout, network, upstream busy.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Upstream rejected the message and will keep rejecting it.
    #[error("permanent transport error: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }

    /// Message text without the class prefix, as written to the send log.
    pub fn message(&self) -> &str {
        match self {
            TransportError::Transient(m) | TransportError::Permanent(m) => m,
        }
    }
}

impl NutriBabyError {
    /// Errors that a later tick may clear on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            NutriBabyError::Store(_) | NutriBabyError::Io(_) => true,
            NutriBabyError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_classes() {
        let t = TransportError::Transient("timeout".into());
        let p = TransportError::Permanent("43101 user refused".into());
        assert!(t.is_retryable());
        assert!(!p.is_retryable());
        assert_eq!(p.message(), "43101 user refused");
    }

    #[test]
    fn transient_classification() {
        assert!(NutriBabyError::Store("locked".into()).is_transient());
        assert!(NutriBabyError::from(TransportError::Transient("x".into())).is_transient());
        assert!(!NutriBabyError::RendererMissing("solid_feeding".into()).is_transient());
        assert!(!NutriBabyError::Config("bad".into()).is_transient());
    }
}
