//! Input guards.
//!
//! # Responsibilities
//! - Turn untrusted input into a typed, validated value or a rejection
//! - Audit every rejection with its specific reason
//! - Keep allow-list tables immutable after startup
//!
//! # Data Flow
//! ```text
//! untrusted input ─► Pending
//!                      │ validate (allow-list, size, type, verb, digest)
//!                      ├────────────► Rejected ─► AuditLog::reject ─► GuardError
//!                      ▼
//!                  Validated (ValidatedUpload / ValidatedCommand / ...)
//!                      │ execute
//!                      ▼
//!                  Executed ─► AuditLog::record
//! ```
//!
//! # Design Decisions
//! - Only `Validated*` values can reach an execute step; their fields are private
//! - Guards are synchronous; callers move blocking work off the async runtime
//! - Session rate state is passed in, never owned by a guard

pub mod command;
pub mod escape;
pub mod include;
pub mod query;
pub mod scan;
pub mod upload;

pub use command::{CommandGuard, CommandRequest, CommandRunner, ShellRunner, ValidatedCommand};
pub use escape::{escape_str, escape_value, OutputContext};
pub use include::{IncludeGuard, IncludedFile, ValidatedInclude};
pub use query::{Param, QueryGuard, QueryOutcome, QueryParams, QueryRequest, ValidatedQuery};
pub use scan::SignatureScanner;
pub use upload::{StoredUpload, UploadGuard, UploadRequest, ValidatedUpload};

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::audit::AuditLog;
use crate::config::GuardConfig;
use crate::error::{GuardError, GuardResult};

/// Which guard made a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardKind {
    Upload,
    Command,
    Query,
    Include,
    Output,
    Login,
    Session,
}

impl GuardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardKind::Upload => "upload",
            GuardKind::Command => "command",
            GuardKind::Query => "query",
            GuardKind::Include => "include",
            GuardKind::Output => "output",
            GuardKind::Login => "login",
            GuardKind::Session => "session",
        }
    }
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a guarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Validated,
    Executed,
    Rejected,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Executed | Stage::Rejected)
    }

    pub fn can_transition_to(&self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Pending, Stage::Validated)
                | (Stage::Pending, Stage::Rejected)
                | (Stage::Validated, Stage::Executed)
                | (Stage::Validated, Stage::Rejected)
        )
    }
}

/// Trace one guard's stage change.
pub(crate) fn transition(guard: GuardKind, from: Stage, to: Stage, subject: &str) {
    debug_assert!(
        from.can_transition_to(to),
        "illegal stage change {:?} -> {:?}",
        from,
        to
    );
    tracing::debug!(
        guard = %guard,
        from = ?from,
        to = ?to,
        terminal = to.is_terminal(),
        subject = %subject,
        "Stage changed"
    );
}

/// Every guard, built once from configuration.
#[derive(Clone)]
pub struct RequestGuard {
    pub upload: Arc<UploadGuard>,
    pub command: Arc<CommandGuard>,
    pub query: Arc<QueryGuard>,
    pub include: Arc<IncludeGuard>,
    pub audit: AuditLog,
}

impl RequestGuard {
    pub fn from_config(config: &GuardConfig, audit: AuditLog) -> GuardResult<Self> {
        let upload = UploadGuard::new(&config.upload, audit.clone())
            .map_err(|e| GuardError::internal(format!("invalid upload signature: {}", e)))?;
        let include = IncludeGuard::new(&config.include, audit.clone())?;

        Ok(Self {
            upload: Arc::new(upload),
            command: Arc::new(CommandGuard::new(&config.command, audit.clone())),
            query: Arc::new(QueryGuard::new(&config.query, audit.clone())),
            include: Arc::new(include),
            audit,
        })
    }

    /// Same as `from_config` but with a custom process runner.
    pub fn with_runner(
        config: &GuardConfig,
        audit: AuditLog,
        runner: Box<dyn CommandRunner>,
    ) -> GuardResult<Self> {
        let mut guard = Self::from_config(config, audit.clone())?;
        guard.command = Arc::new(CommandGuard::with_runner(&config.command, audit, runner));
        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        assert!(Stage::Pending.can_transition_to(Stage::Validated));
        assert!(Stage::Pending.can_transition_to(Stage::Rejected));
        assert!(Stage::Validated.can_transition_to(Stage::Executed));
        assert!(Stage::Validated.can_transition_to(Stage::Rejected));

        assert!(!Stage::Pending.can_transition_to(Stage::Executed));
        assert!(!Stage::Rejected.can_transition_to(Stage::Validated));
        assert!(!Stage::Executed.can_transition_to(Stage::Rejected));
        assert!(Stage::Executed.is_terminal());
        assert!(Stage::Rejected.is_terminal());
        assert!(!Stage::Validated.is_terminal());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "illegal stage change")]
    fn test_illegal_transition_panics() {
        transition(GuardKind::Query, Stage::Rejected, Stage::Executed, "SELECT");
    }

    #[test]
    fn test_guard_kind_labels() {
        assert_eq!(GuardKind::Upload.to_string(), "upload");
        assert_eq!(serde_json::to_string(&GuardKind::Include).unwrap(), "\"include\"");
    }

    #[test]
    fn test_request_guard_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["header.php", "footer.php", "config.php"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        let mut config = GuardConfig::default();
        config.include.dir = dir.path().to_path_buf();

        let (audit, _) = AuditLog::in_memory();
        let guard = RequestGuard::from_config(&config, audit).unwrap();
        assert_eq!(
            guard.include.names().collect::<Vec<_>>(),
            vec!["config.php", "footer.php", "header.php"]
        );
    }

    #[test]
    fn test_request_guard_missing_include_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = GuardConfig::default();
        config.include.dir = dir.path().join("absent");

        let (audit, _) = AuditLog::in_memory();
        assert!(RequestGuard::from_config(&config, audit).is_err());
    }
}
