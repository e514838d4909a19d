use thiserror::Error;

/// Main error type for findex
#[derive(Error, Debug)]
pub enum FindexError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request input (bad path, missing field, unknown enum value)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing or invalid credentials
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Valid credentials but insufficient permission (or expired key)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Directory, key, or source does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists (directory registered, key name taken)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Client exceeded its request budget
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Embedding backend failed or is not configured
    #[error("Embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// Search errors
    #[error("Search error: {0}")]
    Search(String),

    /// Anything else; details are logged, callers see a generic message
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenient Result type using FindexError
pub type Result<T> = std::result::Result<T, FindexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FindexError::Config("missing data_dir".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("missing data_dir"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: FindexError = rusqlite_err.into();
        assert!(matches!(err, FindexError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FindexError = io_err.into();
        assert!(matches!(err, FindexError::Io(_)));
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = FindexError::RateLimited { retry_after_secs: 60 };
        assert!(err.to_string().contains("60"));
    }
}
