//! Error types for piheat-sync wire types.

use thiserror::Error;

/// Errors that can occur while building or parsing wire types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON (de)serialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The operating system random source failed
    #[error("random source unavailable: {0}")]
    Random(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::InvalidData("channel id must not be empty".into());
        assert_eq!(err.to_string(), "invalid data: channel id must not be empty");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
