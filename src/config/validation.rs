//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes, windows, timeouts > 0)
//! - Check allow-list entries are well formed
//! - Compile scan signatures and header values up front
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use axum::http::HeaderValue;
use regex::bytes::Regex;

use crate::config::schema::GuardConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    // Upload
    if config.upload.max_file_size == 0 {
        errors.push(ValidationError::new("upload.max_file_size", "must be greater than 0"));
    }
    if config.upload.allowed_types.is_empty() {
        errors.push(ValidationError::new("upload.allowed_types", "allow-list is empty"));
    }
    for (ext, mime) in &config.upload.allowed_types {
        if ext.is_empty() || ext.contains('.') || *ext != ext.to_ascii_lowercase() {
            errors.push(ValidationError::new(
                format!("upload.allowed_types.{}", ext),
                "extension must be lower-case without a dot",
            ));
        }
        if !mime.contains('/') {
            errors.push(ValidationError::new(
                format!("upload.allowed_types.{}", ext),
                format!("'{}' is not a MIME type", mime),
            ));
        }
    }
    for (i, pattern) in config.upload.signatures.iter().enumerate() {
        if let Err(e) = Regex::new(pattern) {
            errors.push(ValidationError::new(format!("upload.signatures[{}]", i), e.to_string()));
        }
    }

    // Command
    for (name, args) in &config.command.allowed {
        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == '/') {
            errors.push(ValidationError::new(
                format!("command.allowed.{}", name),
                "command name must be a bare word",
            ));
        }
        if args.iter().any(|a| a.is_empty()) {
            errors.push(ValidationError::new(
                format!("command.allowed.{}", name),
                "empty argument in allow-list",
            ));
        }
    }
    if config.command.max_per_window == 0 {
        errors.push(ValidationError::new("command.max_per_window", "must be greater than 0"));
    }
    if config.command.window_secs == 0 {
        errors.push(ValidationError::new("command.window_secs", "must be greater than 0"));
    }

    // Query
    for verb in config.query.verbs.keys() {
        if verb.is_empty() || !verb.chars().all(|c| c.is_ascii_uppercase()) {
            errors.push(ValidationError::new(
                format!("query.verbs.{}", verb),
                "verb must be an upper-case keyword",
            ));
        }
    }
    if config.query.timeout_secs == 0 {
        errors.push(ValidationError::new("query.timeout_secs", "must be greater than 0"));
    }

    // Include
    for entry in &config.include.files {
        if entry.name.is_empty()
            || entry.name.contains('/')
            || entry.name.contains('\\')
            || entry.name == "."
            || entry.name == ".."
        {
            errors.push(ValidationError::new(
                format!("include.files.{}", entry.name),
                "must be a basename",
            ));
        }
        if let Some(digest) = &entry.sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                errors.push(ValidationError::new(
                    format!("include.files.{}.sha256", entry.name),
                    "must be 64 hex characters",
                ));
            }
        }
    }

    // Session / login
    if config.session.cookie_name.is_empty()
        || !config
            .session
            .cookie_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        errors.push(ValidationError::new("session.cookie_name", "invalid cookie name"));
    }
    if config.session.max_sessions == 0 {
        errors.push(ValidationError::new("session.max_sessions", "must be greater than 0"));
    }
    if config.login.max_failed_attempts == 0 {
        errors.push(ValidationError::new("login.max_failed_attempts", "must be greater than 0"));
    }

    // Headers
    let headers = &config.headers;
    for (field, value) in [
        ("headers.frame_options", &headers.frame_options),
        ("headers.xss_protection", &headers.xss_protection),
        ("headers.content_type_options", &headers.content_type_options),
        ("headers.content_security_policy", &headers.content_security_policy),
        ("headers.strict_transport_security", &headers.strict_transport_security),
    ] {
        if value.is_empty() || HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::new(field, "not a valid header value"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::IncludeEntry;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GuardConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GuardConfig::default();
        config.upload.max_file_size = 0;
        config.upload.allowed_types.insert(".PHP".into(), "text".into());
        config.upload.signatures.push("(unclosed".into());
        config.command.allowed.insert("rm -rf".into(), vec![]);
        config.query.verbs.insert("drop".into(), true);
        config.include.files.push(IncludeEntry {
            name: "../etc/passwd".into(),
            sha256: Some("zz".into()),
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"upload.max_file_size"));
        assert!(fields.contains(&"upload.allowed_types..PHP"));
        assert!(fields.contains(&"upload.signatures[4]"));
        assert!(fields.contains(&"command.allowed.rm -rf"));
        assert!(fields.contains(&"query.verbs.drop"));
        assert!(fields.contains(&"include.files.../etc/passwd"));
        assert!(fields.contains(&"include.files.../etc/passwd.sha256"));
    }

    #[test]
    fn test_rejects_bad_header_value() {
        let mut config = GuardConfig::default();
        config.headers.frame_options = "DENY\r\nX-Evil: 1".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "headers.frame_options");
    }
}
