//! Security response headers.
//!
//! # Responsibilities
//! - Stamp the configured security headers on every response
//!
//! # Design Decisions
//! - Headers override whatever a handler set
//! - Applied as the outermost layers so rejections, timeouts and body-limit
//!   responses carry them too

use axum::http::{
    header::{self, HeaderName, InvalidHeaderValue},
    HeaderValue,
};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::HeadersConfig;

/// Header name/value pairs from configuration.
pub fn security_headers(
    config: &HeadersConfig,
) -> Result<Vec<(HeaderName, HeaderValue)>, InvalidHeaderValue> {
    Ok(vec![
        (header::X_FRAME_OPTIONS, HeaderValue::from_str(&config.frame_options)?),
        (header::X_XSS_PROTECTION, HeaderValue::from_str(&config.xss_protection)?),
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_str(&config.content_type_options)?,
        ),
        (
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_str(&config.content_security_policy)?,
        ),
        (
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_str(&config.strict_transport_security)?,
        ),
    ])
}

/// One overriding layer per security header.
pub fn security_header_layers(
    config: &HeadersConfig,
) -> Result<Vec<SetResponseHeaderLayer<HeaderValue>>, InvalidHeaderValue> {
    Ok(security_headers(config)?
        .into_iter()
        .map(|(name, value)| SetResponseHeaderLayer::overriding(name, value))
        .collect())
}
