use thiserror::Error;

#[derive(Error, Debug)]
pub enum BucketryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Cannot merge values at '{path}': {reason}")]
    MergeConflict { path: String, reason: String },

    #[error("Conflicting value paths at '{path}'")]
    PathConflict { path: String },

    #[error("Write buffer '{name}' has been shut down")]
    BufferShutdown { name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for bucketry operations
pub type Result<T> = std::result::Result<T, BucketryError>;

impl BucketryError {
    /// Creates a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Creates a new merge conflict error
    pub fn merge_conflict<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Self::MergeConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same call could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Parse { .. } | Self::Serialization(_) => "serialization",
            Self::MergeConflict { .. } | Self::PathConflict { .. } => "codec",
            Self::BufferShutdown { .. } => "buffer",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BucketryError::storage("connection refused");
        assert_eq!(err.to_string(), "Storage error: connection refused");
        assert_eq!(err.category(), "storage");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(BucketryError::storage("timeout").is_recoverable());
        assert!(!BucketryError::config("bad separator").is_recoverable());
        assert!(!BucketryError::BufferShutdown {
            name: "primary".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_merge_conflict_message() {
        let err = BucketryError::merge_conflict("latency.p99", "cannot add text values");
        assert_eq!(
            err.to_string(),
            "Cannot merge values at 'latency.p99': cannot add text values"
        );
        assert_eq!(err.category(), "codec");
    }
}
