//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → session.rs (cookie → session, strict mode, token rotation)
//!     → handler
//!         → rate_limit.rs (per-session command / failed-login windows)
//!         → credentials.rs (login via Query Guard + Argon2)
//!     → headers.rs (security headers on every response)
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - No trust in client input, including the session token itself

pub mod credentials;
pub mod headers;
pub mod rate_limit;
pub mod session;

pub use credentials::{hash_password, verify_password, AuthenticatedUser, Authenticator};
pub use rate_limit::RateWindow;
pub use session::{session_middleware, SessionStore, SessionToken};
