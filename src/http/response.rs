//! Response mapping.
//!
//! # Responsibilities
//! - Render guard rejections as HTTP 400 with the generic public message
//! - Render handler output as escaped HTML fragments
//!
//! # Design Decisions
//! - Internal detail never reaches a response body; it is already audited
//! - Every rejection kind maps to the same status so clients cannot tell
//!   which check failed

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::error::GuardError;
use crate::guard::escape::escape_html;

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        tracing::debug!(kind = %self.kind(), "Request rejected");
        (StatusCode::BAD_REQUEST, self.public_message()).into_response()
    }
}

/// An HTML paragraph holding escaped text.
pub fn html_message(text: &str) -> Html<String> {
    Html(format!("<p>{}</p>", escape_html(text)))
}

/// Escaped preformatted output.
pub fn html_pre(text: &str) -> Html<String> {
    Html(format!("<pre>{}</pre>", escape_html(text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejection_is_generic_400() {
        let response = GuardError::authorization("Unauthorized command attempted: rm").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Request not allowed.");
    }

    #[test]
    fn test_html_helpers_escape() {
        assert_eq!(html_message("<b>").0, "<p>&lt;b&gt;</p>");
        assert_eq!(html_pre("a & b").0, "<pre>a &amp; b</pre>");
    }
}
