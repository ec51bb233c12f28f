//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard
//! service. All types derive Serde traits for deserialization from config
//! files. Defaults reproduce the hardened allow-lists.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the request guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upload guard settings.
    pub upload: UploadConfig,

    /// Command allow-list and rate window.
    pub command: CommandConfig,

    /// Query verb table and statement timeout.
    pub query: QueryConfig,

    /// Include allow-list.
    pub include: IncludeConfig,

    /// Audit log sink.
    pub audit: AuditConfig,

    /// Session cookie and lifetime.
    pub session: SessionConfig,

    /// Credential policy.
    pub login: LoginConfig,

    /// Security response headers.
    pub headers: HeadersConfig,

    /// Database location.
    pub database: DatabaseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Upload guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes.
    pub max_file_size: u64,

    /// Destination directory for accepted files.
    pub upload_dir: PathBuf,

    /// Where in-flight uploads are staged. Defaults to the system temp dir.
    pub staging_dir: Option<PathBuf>,

    /// Allowed extension (lower-case, no dot) to the MIME type it must sniff as.
    pub allowed_types: BTreeMap<String, String>,

    /// Byte signatures (regular expressions) flagged by the content scan.
    pub signatures: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let allowed_types = [
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("png", "image/png"),
            ("pdf", "application/pdf"),
        ]
        .into_iter()
        .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
        .collect();

        Self {
            max_file_size: 5 * 1024 * 1024, // 5MB
            upload_dir: PathBuf::from("uploads"),
            staging_dir: None,
            allowed_types,
            signatures: default_signatures(),
        }
    }
}

fn default_signatures() -> Vec<String> {
    [r"(?i)<\?php", r"(?i)shell_exec", r"(?i)base64_decode", r"(?i)eval\("]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Command guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Allowed command name to its allowed arguments.
    pub allowed: BTreeMap<String, Vec<String>>,

    /// Shell used to run the escaped command line.
    pub shell: PathBuf,

    /// Maximum executions per session within the window.
    pub max_per_window: usize,

    /// Rate window length in seconds.
    pub window_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        let mut allowed = BTreeMap::new();
        allowed.insert(
            "ls".to_string(),
            vec!["--help".to_string(), "-l".to_string(), "-a".to_string()],
        );
        allowed.insert("dir".to_string(), vec!["--help".to_string(), "/w".to_string()]);
        allowed.insert("pwd".to_string(), Vec::new());

        Self {
            allowed,
            shell: PathBuf::from("/bin/sh"),
            max_per_window: 10,
            window_secs: 60,
        }
    }
}

/// Query guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Statement verb (upper-case) to whether it may execute.
    pub verbs: BTreeMap<String, bool>,

    /// Statement timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let verbs = [("SELECT", true), ("INSERT", true), ("UPDATE", true), ("DELETE", false)]
            .into_iter()
            .map(|(verb, allowed)| (verb.to_string(), allowed))
            .collect();

        Self {
            verbs,
            timeout_secs: 5,
        }
    }
}

/// Include guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IncludeConfig {
    /// Directory holding includable files.
    pub dir: PathBuf,

    /// Registered files.
    pub files: Vec<IncludeEntry>,
}

impl Default for IncludeConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("includes"),
            files: ["header.php", "footer.php", "config.php"]
                .into_iter()
                .map(|name| IncludeEntry {
                    name: name.to_string(),
                    sha256: None,
                })
                .collect(),
        }
    }
}

/// A registered include file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IncludeEntry {
    /// Basename inside the include directory.
    pub name: String,

    /// Expected SHA-256 (hex). Recorded from disk at startup when absent.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Audit sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Append-only audit log file.
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("security.log"),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie name carrying the session token.
    pub cookie_name: String,

    /// Mark the cookie `Secure`.
    pub secure_cookie: bool,

    /// Token regeneration interval in seconds.
    pub regenerate_secs: u64,

    /// Idle lifetime in seconds.
    pub idle_timeout_secs: u64,

    /// Upper bound on live sessions. The least recently seen are evicted
    /// once it is reached.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "guard_session".to_string(),
            secure_cookie: true,
            regenerate_secs: 300,
            idle_timeout_secs: 1800,
            max_sessions: 100_000,
        }
    }
}

/// Credential policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Minimum password length.
    pub password_min_length: usize,

    /// Failed attempts tolerated before lockout.
    pub max_failed_attempts: usize,

    /// Lockout window in seconds.
    pub lockout_secs: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            password_min_length: 12,
            max_failed_attempts: 5,
            lockout_secs: 900, // 15 minutes
        }
    }
}

/// Security response headers, set on every response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersConfig {
    pub frame_options: String,
    pub xss_protection: String,
    pub content_type_options: String,
    pub content_security_policy: String,
    pub strict_transport_security: String,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            frame_options: "DENY".to_string(),
            xss_protection: "1; mode=block".to_string(),
            content_type_options: "nosniff".to_string(),
            content_security_policy: "default-src 'self'".to_string(),
            strict_transport_security: "max-age=31536000; includeSubDomains".to_string(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. `:memory:` opens a private in-memory database.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "guard.db".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
