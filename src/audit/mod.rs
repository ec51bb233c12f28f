//! Audit subsystem.
//!
//! # Data Flow
//! ```text
//! guard decision
//!     → AuditLog::record (AuditEvent: timestamp + guard + message)
//!     → tracing (target "audit")
//!     → metrics (guard_decisions_total)
//!     → AuditSink (flat file, append-only)
//! ```
//!
//! # Design Decisions
//! - Events are never mutated or removed once written
//! - Appends are fire-and-forget: a failing sink is logged, not propagated
//! - Internal detail is written here and nowhere client-facing

mod sink;

pub use sink::{AuditSink, FileAuditSink, MemoryAuditSink};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::GuardError;
use crate::guard::GuardKind;
use crate::observability::metrics;

/// A single security-relevant decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub guard: GuardKind,
    pub message: String,
}

impl AuditEvent {
    pub fn new(guard: GuardKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            guard,
            message: message.into(),
        }
    }

    /// Flat-file line, without trailing newline. Control characters in the
    /// message are escaped so one event is always exactly one line.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            escape_control(&self.message)
        )
    }
}

fn escape_control(message: &str) -> String {
    if !message.chars().any(char::is_control) {
        return message.to_string();
    }
    message
        .chars()
        .map(|c| {
            if c.is_control() {
                c.escape_default().to_string()
            } else {
                c.to_string()
            }
        })
        .collect()
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Shared handle every guard writes through.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// An audit log that keeps events in memory, returned with its sink.
    pub fn in_memory() -> (Self, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::default());
        (Self::new(sink.clone()), sink)
    }

    /// Record a successful, security-relevant action.
    pub fn record(&self, guard: GuardKind, message: impl Into<String>) {
        let event = AuditEvent::new(guard, message);
        tracing::info!(target: "audit", guard = %guard, "{}", event.message);
        metrics::record_decision(guard, "allowed");
        self.sink.record(&event);
    }

    /// Record a rejection with its internal detail and hand the error back.
    pub fn reject(&self, guard: GuardKind, err: GuardError) -> GuardError {
        let event = AuditEvent::new(guard, err.detail());
        tracing::warn!(
            target: "audit",
            guard = %guard,
            kind = %err.kind(),
            "{}",
            event.message
        );
        metrics::record_decision(guard, err.kind().as_str());
        self.sink.record(&event);
        err
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}
