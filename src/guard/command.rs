//! Command Guard.
//!
//! A command runs only if its name and every argument appear in the
//! allow-list, and the session's window has room. The resolved words are
//! shell-quoted before they reach the shell even though they are allow-listed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use crate::audit::AuditLog;
use crate::config::CommandConfig;
use crate::error::{GuardError, GuardResult};
use crate::guard::{transition, GuardKind, Stage};
use crate::security::rate_limit::RateWindow;

/// A command as requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

/// A command that passed the allow-list and rate checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    command: String,
    command_line: String,
}

impl ValidatedCommand {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The escaped line handed to the shell.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }
}

/// The process-execution facility.
pub trait CommandRunner: Send + Sync {
    /// Run an escaped command line, returning combined stdout and stderr.
    fn run(&self, command_line: &str) -> std::io::Result<String>;
}

/// Runs command lines through a POSIX shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: PathBuf,
}

impl ShellRunner {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command_line: &str) -> std::io::Result<String> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command_line)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            tracing::debug!(status = ?output.status.code(), "Command exited unsuccessfully");
        }
        Ok(combined)
    }
}

pub struct CommandGuard {
    allowed: BTreeMap<String, BTreeSet<String>>,
    window: Duration,
    max_per_window: usize,
    runner: Box<dyn CommandRunner>,
    audit: AuditLog,
}

impl CommandGuard {
    pub fn new(config: &CommandConfig, audit: AuditLog) -> Self {
        Self::with_runner(config, audit, Box::new(ShellRunner::new(config.shell.clone())))
    }

    pub fn with_runner(config: &CommandConfig, audit: AuditLog, runner: Box<dyn CommandRunner>) -> Self {
        let allowed = config
            .allowed
            .iter()
            .map(|(name, args)| (name.clone(), args.iter().cloned().collect()))
            .collect();

        Self {
            allowed,
            window: Duration::from_secs(config.window_secs),
            max_per_window: config.max_per_window,
            runner,
            audit,
        }
    }

    /// A fresh window sized for this guard.
    pub fn new_window(&self) -> RateWindow {
        RateWindow::new(self.window, self.max_per_window)
    }

    /// Check the request against the allow-list and consume a slot in `window`.
    pub fn authorize(
        &self,
        request: &CommandRequest,
        window: &mut RateWindow,
        now: Instant,
    ) -> GuardResult<ValidatedCommand> {
        self.check(request, window, now)
            .map_err(|e| self.audit.reject(GuardKind::Command, e))
    }

    fn check(
        &self,
        request: &CommandRequest,
        window: &mut RateWindow,
        now: Instant,
    ) -> GuardResult<ValidatedCommand> {
        if window.is_exhausted(now) {
            return Err(GuardError::rate_limit(format!(
                "Too many command executions: {} within window, retry in {}s",
                window.max(),
                window.retry_after(now).as_secs()
            )));
        }

        let allowed_args = self.allowed.get(&request.command).ok_or_else(|| {
            GuardError::authorization(format!(
                "Unauthorized command attempted: {}",
                request.command
            ))
        })?;

        if let Some(arg) = request.args.iter().find(|a| !allowed_args.contains(*a)) {
            return Err(GuardError::authorization(format!(
                "Unauthorized command argument attempted: {} {}",
                request.command, arg
            )));
        }

        let command_line = shell_command_line(&request.command, &request.args);

        if !window.try_acquire(now) {
            return Err(GuardError::rate_limit("Too many command executions"));
        }

        transition(GuardKind::Command, Stage::Pending, Stage::Validated, &command_line);
        Ok(ValidatedCommand {
            command: request.command.clone(),
            command_line,
        })
    }

    /// Run a validated command and return its combined output.
    pub fn execute(&self, command: ValidatedCommand) -> GuardResult<String> {
        match self.runner.run(&command.command_line) {
            Ok(output) => {
                transition(GuardKind::Command, Stage::Validated, Stage::Executed, &command.command_line);
                self.audit.record(
                    GuardKind::Command,
                    format!("Command executed: {}", command.command_line),
                );
                Ok(output)
            }
            Err(e) => Err(self.audit.reject(
                GuardKind::Command,
                GuardError::internal(format!("Command failed to start: {}: {}", command.command, e)),
            )),
        }
    }

    /// Authorize then execute.
    pub fn run(
        &self,
        request: &CommandRequest,
        window: &mut RateWindow,
        now: Instant,
    ) -> GuardResult<String> {
        let validated = self.authorize(request, window, now)?;
        self.execute(validated)
    }
}

/// Quote a command and its arguments as shell words, joined by spaces.
pub fn shell_command_line(command: &str, args: &[String]) -> String {
    let mut out = shell_word(command);
    for arg in args {
        out.push(' ');
        out.push_str(&shell_word(arg));
    }
    out
}

/// Single-quote a word unless it only holds characters the shell leaves alone.
pub fn shell_word(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }

    if is_safe_shell_word(word) {
        return word.to_string();
    }

    let mut out = String::with_capacity(word.len() + 2);
    out.push('\'');
    for (i, part) in word.split('\'').enumerate() {
        if i > 0 {
            out.push_str("'\"'\"'");
        }
        out.push_str(part);
    }
    out.push('\'');
    out
}

fn is_safe_shell_word(word: &str) -> bool {
    word.bytes().all(|b| {
        matches!(
            b,
            b'a'..=b'z'
                | b'A'..=b'Z'
                | b'0'..=b'9'
                | b'_'
                | b'-'
                | b'.'
                | b'/'
                | b':'
                | b'@'
                | b'%'
                | b'+'
                | b'='
                | b','
        )
    })
}
