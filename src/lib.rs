//! Request Guard library.
//!
//! Accepts untrusted input for a small set of declared intents (upload a
//! file, run a command, run a query, include a file, render output) and
//! either returns a validated result or rejects with an audited reason.

pub mod audit;
pub mod config;
pub mod database;
pub mod error;
pub mod guard;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use config::GuardConfig;
pub use error::{GuardError, GuardResult};
pub use guard::RequestGuard;
pub use http::{AppState, GuardServer};
pub use lifecycle::Shutdown;
