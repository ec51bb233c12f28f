//! Server-side sessions.
//!
//! # Responsibilities
//! - Issue random session tokens carried in a strict cookie
//! - Regenerate tokens once a session reaches its rotation age
//! - Hold per-session guard state (command window, failed-login window, user)
//!
//! # Design Decisions
//! - Strict mode: a token the store did not issue is never adopted
//! - Idle sessions are purged lazily when a session is issued, at most once
//!   per `PURGE_INTERVAL`
//! - The store is bounded; the least recently seen sessions are evicted first
//! - A window's read-modify-write happens under the map entry lock

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

use crate::config::{CommandConfig, LoginConfig, SessionConfig};
use crate::observability::metrics;
use crate::security::rate_limit::RateWindow;

const TOKEN_BYTES: usize = 32;

/// Minimum spacing between idle sweeps.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Share of the store evicted when it is full.
const EVICT_DIVISOR: usize = 10;

/// Per-session state.
#[derive(Debug, Clone)]
pub struct Session {
    pub created_at: Instant,
    pub regenerated_at: Instant,
    pub last_seen: Instant,
    pub command_window: RateWindow,
    pub login_window: RateWindow,
    pub user_id: Option<i64>,
}

/// The session bound to the current request, inserted as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(pub String);

/// Outcome of resolving a presented cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub token: String,
    /// True when the client must be sent a new cookie.
    pub issued: bool,
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    cookie_name: String,
    secure_cookie: bool,
    regenerate_after: Duration,
    idle_timeout: Duration,
    max_sessions: usize,
    last_purge: Mutex<Instant>,
    command_window: (Duration, usize),
    login_window: (Duration, usize),
}

impl SessionStore {
    pub fn new(session: &SessionConfig, command: &CommandConfig, login: &LoginConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            cookie_name: session.cookie_name.clone(),
            secure_cookie: session.secure_cookie,
            regenerate_after: Duration::from_secs(session.regenerate_secs),
            idle_timeout: Duration::from_secs(session.idle_timeout_secs),
            max_sessions: session.max_sessions.max(1),
            last_purge: Mutex::new(Instant::now()),
            command_window: (Duration::from_secs(command.window_secs), command.max_per_window),
            login_window: (Duration::from_secs(login.lockout_secs), login.max_failed_attempts),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.sessions.contains_key(token)
    }

    /// Map a presented token to a live session, issuing or rotating as needed.
    pub fn resolve(&self, presented: Option<&str>, now: Instant) -> ResolvedSession {
        if let Some(token) = presented {
            if let Some(mut entry) = self.sessions.get_mut(token) {
                let session = entry.value_mut();
                if now.duration_since(session.last_seen) < self.idle_timeout {
                    session.last_seen = now;
                    if now.duration_since(session.regenerated_at) < self.regenerate_after {
                        return ResolvedSession {
                            token: token.to_string(),
                            issued: false,
                        };
                    }
                    drop(entry);
                    return self.regenerate(token, now);
                }
            }
            // Unknown or idle: drop whatever is held under it.
            self.sessions.remove(token);
            tracing::debug!("Replacing unknown or expired session token");
        }
        self.issue(now)
    }

    fn regenerate(&self, old: &str, now: Instant) -> ResolvedSession {
        match self.sessions.remove(old) {
            Some((_, mut session)) => {
                session.regenerated_at = now;
                let token = new_token();
                self.sessions.insert(token.clone(), session);
                tracing::debug!("Session token regenerated");
                ResolvedSession {
                    token,
                    issued: true,
                }
            }
            // Raced with another request that already rotated it.
            None => self.issue(now),
        }
    }

    fn issue(&self, now: Instant) -> ResolvedSession {
        self.maybe_purge(now);
        if self.sessions.len() >= self.max_sessions {
            self.evict_least_recent();
        }
        let token = new_token();
        self.sessions.insert(
            token.clone(),
            Session {
                created_at: now,
                regenerated_at: now,
                last_seen: now,
                command_window: RateWindow::new(self.command_window.0, self.command_window.1),
                login_window: RateWindow::new(self.login_window.0, self.login_window.1),
                user_id: None,
            },
        );
        metrics::record_sessions(self.sessions.len());
        ResolvedSession {
            token,
            issued: true,
        }
    }

    fn maybe_purge(&self, now: Instant) {
        let due = {
            let mut last = match self.last_purge.lock() {
                Ok(l) => l,
                Err(poisoned) => poisoned.into_inner(),
            };
            if now.duration_since(*last) >= PURGE_INTERVAL {
                *last = now;
                true
            } else {
                false
            }
        };
        if due {
            self.purge_idle(now);
        }
    }

    /// Drop sessions idle for longer than the timeout.
    pub fn purge_idle(&self, now: Instant) {
        let idle = self.idle_timeout;
        self.sessions
            .retain(|_, s| now.duration_since(s.last_seen) < idle);
    }

    /// Drop the least recently seen tenth of the store.
    fn evict_least_recent(&self) {
        let mut seen: Vec<(Instant, String)> = self
            .sessions
            .iter()
            .map(|e| (e.value().last_seen, e.key().clone()))
            .collect();
        seen.sort_unstable_by_key(|(last_seen, _)| *last_seen);

        let count = (seen.len() / EVICT_DIVISOR).max(1);
        for (_, token) in seen.into_iter().take(count) {
            self.sessions.remove(&token);
        }
        tracing::warn!(evicted = count, limit = self.max_sessions, "Session store full");
    }

    /// Run `f` against a session while holding its entry lock.
    pub fn with_session<R>(&self, token: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.get_mut(token).map(|mut entry| f(entry.value_mut()))
    }

    /// `Set-Cookie` value for a token.
    pub fn cookie_header(&self, token: &str) -> String {
        let secure = if self.secure_cookie { " Secure;" } else { "" };
        format!(
            "{}={}; HttpOnly;{} SameSite=Strict; Path=/",
            self.cookie_name, token, secure
        )
    }
}

/// Value of the named cookie in a request's `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

fn new_token() -> String {
    hex::encode(rand::random::<[u8; TOKEN_BYTES]>())
}

/// Attach a session to every request and set the cookie when one is issued.
pub async fn session_middleware(
    State(store): State<Arc<SessionStore>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let presented = cookie_value(req.headers(), store.cookie_name()).map(str::to_string);
    let resolved = store.resolve(presented.as_deref(), Instant::now());

    req.extensions_mut().insert(SessionToken(resolved.token.clone()));
    let mut response = next.run(req).await;

    if resolved.issued {
        match HeaderValue::from_str(&store.cookie_header(&resolved.token)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode session cookie"),
        }
    }
    response
}
