//! Guard error taxonomy.
//!
//! Every rejection carries an internal detail string that goes to the audit
//! log, and maps to one of a small set of generic public messages. The detail
//! never leaves the process.

use std::fmt;

use thiserror::Error;

/// Error raised at a guard boundary.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Bad size, type or format.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Command, query verb or file not allow-listed.
    #[error("not allowed: {0}")]
    Authorization(String),

    /// Content hash mismatch or missing registered resource.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Per-session window exhausted.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// Filesystem, process or runtime failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for metrics labels and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Integrity,
    RateLimit,
    Database,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Integrity => "integrity",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Database => "database",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GuardError {
    pub fn validation(detail: impl Into<String>) -> Self {
        GuardError::Validation(detail.into())
    }

    pub fn authorization(detail: impl Into<String>) -> Self {
        GuardError::Authorization(detail.into())
    }

    pub fn integrity(detail: impl Into<String>) -> Self {
        GuardError::Integrity(detail.into())
    }

    pub fn rate_limit(detail: impl Into<String>) -> Self {
        GuardError::RateLimit(detail.into())
    }

    pub fn database(detail: impl Into<String>) -> Self {
        GuardError::Database(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        GuardError::Internal(detail.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::Validation(_) => ErrorKind::Validation,
            GuardError::Authorization(_) => ErrorKind::Authorization,
            GuardError::Integrity(_) => ErrorKind::Integrity,
            GuardError::RateLimit(_) => ErrorKind::RateLimit,
            GuardError::Database(_) => ErrorKind::Database,
            GuardError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Internal detail, suitable for the audit log only.
    pub fn detail(&self) -> &str {
        match self {
            GuardError::Validation(d)
            | GuardError::Authorization(d)
            | GuardError::Integrity(d)
            | GuardError::RateLimit(d)
            | GuardError::Database(d)
            | GuardError::Internal(d) => d,
        }
    }

    /// Message shown to the client.
    pub fn public_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "Invalid request. Please check your input.",
            ErrorKind::Authorization => "Request not allowed.",
            ErrorKind::Integrity => "Requested resource is unavailable.",
            ErrorKind::RateLimit => "Too many requests. Please try again later.",
            ErrorKind::Database => "Database error occurred.",
            ErrorKind::Internal => "An error occurred. Please try again.",
        }
    }
}

impl From<std::io::Error> for GuardError {
    fn from(e: std::io::Error) -> Self {
        GuardError::Internal(e.to_string())
    }
}

impl From<rusqlite::Error> for GuardError {
    fn from(e: rusqlite::Error) -> Self {
        GuardError::Database(e.to_string())
    }
}

pub type GuardResult<T> = Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_detail() {
        let err = GuardError::database("no such table: users at /var/lib/guard.db");
        assert_eq!(err.public_message(), "Database error occurred.");
        assert!(!err.public_message().contains("users"));
        assert!(err.detail().contains("no such table"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(GuardError::rate_limit("x").kind(), ErrorKind::RateLimit);
        assert_eq!(GuardError::integrity("x").kind().as_str(), "integrity");
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(GuardError::from(io).kind(), ErrorKind::Internal);
    }
}
