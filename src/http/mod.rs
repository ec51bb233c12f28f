//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, layers)
//!     → request.rs (request ID, metrics)
//!     → security::session (cookie → session)
//!     → handlers.rs (collect input → guard on a blocking thread)
//!     → response.rs (escaped HTML or generic 400)
//!     → security headers → client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, GuardServer};
