//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → lifecycle::startup builds the guards once
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; allow-lists never change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuditConfig, CommandConfig, DatabaseConfig, GuardConfig, HeadersConfig, IncludeConfig,
    IncludeEntry, ListenerConfig, LoginConfig, ObservabilityConfig, QueryConfig, SessionConfig,
    TimeoutConfig, TlsConfig, UploadConfig,
};
