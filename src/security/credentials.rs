//! Password login.
//!
//! Users are looked up through the Query Guard and verified against an
//! Argon2 PHC string. Failed attempts are counted in the session's login
//! window; a full window locks the session out until it slides.

use std::sync::Arc;
use std::time::Instant;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::Connection;
use serde_json::Value;

use crate::audit::AuditLog;
use crate::config::LoginConfig;
use crate::error::{GuardError, GuardResult};
use crate::guard::{GuardKind, Param, QueryGuard, QueryRequest};
use crate::security::rate_limit::RateWindow;

const LOOKUP_SQL: &str = "SELECT id, username, password_hash FROM users WHERE username = ?";
const INSERT_SQL: &str = "INSERT INTO users (username, password_hash) VALUES (?, ?)";

/// Verified against when the username is unknown, so a miss costs the same
/// Argon2 work as a wrong password.
const DUMMY_PASSWORD: &str = "unknown-user-placeholder";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
}

pub struct Authenticator {
    query: Arc<QueryGuard>,
    min_length: usize,
    dummy_hash: Option<String>,
    audit: AuditLog,
}

impl Authenticator {
    pub fn new(config: &LoginConfig, query: Arc<QueryGuard>, audit: AuditLog) -> Self {
        let dummy_hash = match hash_password(DUMMY_PASSWORD) {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to prepare placeholder password hash");
                None
            }
        };
        Self {
            query,
            min_length: config.password_min_length,
            dummy_hash,
            audit,
        }
    }

    /// Check a username and password, counting failures in `window`.
    pub fn login(
        &self,
        conn: &Connection,
        username: &str,
        password: &str,
        window: &mut RateWindow,
        now: Instant,
    ) -> GuardResult<AuthenticatedUser> {
        if window.is_exhausted(now) {
            return Err(self.audit.reject(
                GuardKind::Login,
                GuardError::rate_limit(format!(
                    "Too many failed login attempts, retry in {}s",
                    window.retry_after(now).as_secs()
                )),
            ));
        }

        if password.chars().count() < self.min_length {
            return Err(self
                .audit
                .reject(GuardKind::Login, GuardError::validation("Password too short")));
        }

        let rows = self
            .query
            .run(
                conn,
                QueryRequest::positional(LOOKUP_SQL, vec![Param::from(username)]),
            )?
            .rows();

        let user = match rows.first() {
            Some(row) => {
                let id = row.get("id").and_then(Value::as_i64);
                let hash = row.get("password_hash").and_then(Value::as_str);
                match (id, hash) {
                    (Some(id), Some(hash)) if verify_password(password, hash) => {
                        Some(AuthenticatedUser {
                            id,
                            username: username.to_string(),
                        })
                    }
                    _ => None,
                }
            }
            None => {
                if let Some(dummy) = &self.dummy_hash {
                    verify_password(password, dummy);
                }
                None
            }
        };

        match user {
            Some(user) => {
                window.clear();
                self.audit
                    .record(GuardKind::Login, format!("Successful login for user: {}", username));
                Ok(user)
            }
            None => {
                window.record(now);
                self.audit.reject(
                    GuardKind::Login,
                    GuardError::authorization(format!("Failed login attempt for user: {}", username)),
                );
                Err(GuardError::authorization("Invalid credentials"))
            }
        }
    }

    /// Insert a user with an Argon2 hash of `password`.
    pub fn create_user(&self, conn: &Connection, username: &str, password: &str) -> GuardResult<i64> {
        if password.chars().count() < self.min_length {
            return Err(GuardError::validation("Password too short"));
        }
        let hash = hash_password(password)?;
        self.query.run(
            conn,
            QueryRequest::positional(INSERT_SQL, vec![Param::from(username), Param::from(hash)]),
        )?;
        self.audit
            .record(GuardKind::Login, format!("User created: {}", username));
        Ok(conn.last_insert_rowid())
    }
}

/// Argon2id PHC string for `password` with a fresh random salt.
pub fn hash_password(password: &str) -> GuardResult<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| GuardError::internal(format!("salt encoding failed: {}", e)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GuardError::internal(format!("password hashing failed: {}", e)))
}

/// Constant-time verification; malformed hashes never verify.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}
