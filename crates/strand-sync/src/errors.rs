//! Synchronizer error types.

use strand_store::StoreError;

/// Failure reported by the remote event source.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The remote could not be reached or timed out.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote answered but refused the request.
    #[error("remote rejected request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors surfaced by scrollback.
///
/// `Clone` so one shared in-flight operation can hand the same failure to
/// every caller that joined it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SyncError {
    /// Remote fetch failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local store failed.
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl SyncError {
    /// Whether a later attempt may succeed. Store failures count as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_retryable(),
            Self::Store(_) => true,
        }
    }

    /// Error category string for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::Store(_) => "store",
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_display() {
        let err = RemoteError::Unavailable("timeout".into());
        assert_eq!(err.to_string(), "remote unavailable: timeout");
        assert!(err.is_retryable());
        assert!(!RemoteError::Rejected("403".into()).is_retryable());
    }

    #[test]
    fn store_error_converts_to_string_variant() {
        let err: SyncError = StoreError::InvalidEvent("bad".into()).into();
        assert_eq!(err.category(), "store");
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn sync_error_is_clone() {
        let err = SyncError::from(RemoteError::Rejected("no".into()));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
        assert_eq!(copy.category(), "remote");
        assert!(!copy.is_retryable());
        assert!(SyncError::Store("locked".into()).is_retryable());
    }
}
