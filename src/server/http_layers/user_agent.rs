//! User-Agent allow-listing for box management calls.

use axum::http::{header, HeaderMap};

/// Whether the request's User-Agent is on the configured allow list.
/// A missing or unreadable header never matches; an empty list denies all.
pub fn user_agent_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    match headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
        Some(agent) => allowed.iter().any(|candidate| candidate == agent),
        None => false,
    }
}
