//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Open the audit sink and database
//! - Build the guards, sessions and authenticator into `AppState`
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Include digests are recorded here, before any traffic is accepted

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::audit::{AuditLog, FileAuditSink};
use crate::config::{load_config, validation::validate_config, ConfigError, GuardConfig};
use crate::database::Database;
use crate::error::GuardError;
use crate::guard::RequestGuard;
use crate::http::AppState;
use crate::security::{Authenticator, SessionStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audit log unavailable at {path}: {source}")]
    Audit {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Guard initialization failed: {0}")]
    Guard(#[from] GuardError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load the config file if one is given, otherwise use defaults.
pub fn load(path: Option<&Path>) -> Result<GuardConfig, StartupError> {
    match path {
        Some(path) => {
            let config = load_config(path)?;
            tracing::info!(path = %path.display(), "Configuration loaded");
            Ok(config)
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            Ok(GuardConfig::default())
        }
    }
}

/// Build application state with the file audit sink from `config`.
pub fn bootstrap(config: &GuardConfig) -> Result<AppState, StartupError> {
    let sink = FileAuditSink::open(&config.audit.path).map_err(|source| StartupError::Audit {
        path: config.audit.path.clone(),
        source,
    })?;
    build_state(config, AuditLog::new(Arc::new(sink)))
}

/// Build application state around an existing audit log.
pub fn build_state(config: &GuardConfig, audit: AuditLog) -> Result<AppState, StartupError> {
    validate_config(config).map_err(ConfigError::Validation)?;

    let guards = RequestGuard::from_config(config, audit.clone())?;
    let db = Database::open(&config.database)?;
    let auth = Authenticator::new(&config.login, guards.query.clone(), audit);
    let sessions = SessionStore::new(&config.session, &config.command, &config.login);

    let staging_dir = config
        .upload
        .staging_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&staging_dir)?;

    tracing::info!(
        includes = guards.include.names().count(),
        commands = config.command.allowed.len(),
        upload_dir = %config.upload.upload_dir.display(),
        "Guards initialized"
    );

    Ok(AppState {
        guards,
        sessions: Arc::new(sessions),
        auth: Arc::new(auth),
        db,
        staging_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> GuardConfig {
        let includes = dir.path().join("includes");
        std::fs::create_dir_all(&includes).unwrap();
        for name in ["header.php", "footer.php", "config.php"] {
            std::fs::write(includes.join(name), name).unwrap();
        }

        let mut config = GuardConfig::default();
        config.include.dir = includes;
        config.audit.path = dir.path().join("logs/security.log");
        config.upload.upload_dir = dir.path().join("uploads");
        config.upload.staging_dir = Some(dir.path().join("staging"));
        config.database = DatabaseConfig {
            path: ":memory:".into(),
        };
        config
    }

    #[test]
    fn test_bootstrap_creates_audit_log_and_staging() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let state = bootstrap(&config).unwrap();
        assert!(dir.path().join("logs/security.log").exists());
        assert!(state.staging_dir.is_dir());
        assert_eq!(state.guards.include.names().count(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.login.max_failed_attempts = 0;

        let (audit, _) = AuditLog::in_memory();
        assert!(matches!(
            build_state(&config, audit),
            Err(StartupError::Config(ConfigError::Validation(_)))
        ));
    }

    #[test]
    fn test_missing_include_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.include.dir = dir.path().join("nowhere");

        let (audit, _) = AuditLog::in_memory();
        assert!(matches!(build_state(&config, audit), Err(StartupError::Guard(_))));
    }
}
