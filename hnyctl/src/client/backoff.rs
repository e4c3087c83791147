//! Retry-After header resolution.
//!
//! The API signals rate limiting with a `Retry-After` header carrying either
//! delta-seconds or an HTTP-date. Both forms are resolved to a wait in whole
//! seconds against an injected "now" so the logic stays deterministic.

use chrono::{DateTime, Utc};

/// Fallback wait when the header is absent or unparseable.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Safety buffer added when converting an absolute timestamp to a delta.
const DATE_BUFFER_SECS: i64 = 1;

/// Resolve a `Retry-After` header value to a wait duration in seconds.
///
/// Tries delta-seconds first, then an HTTP-date (RFC 5322 form, `GMT`
/// accepted). Dates are converted to a delta against `now` plus a one second
/// buffer, floored at 1. Anything else resolves to
/// [`DEFAULT_RETRY_AFTER_SECS`].
pub fn resolve_retry_after(header: Option<&str>, now: DateTime<Utc>) -> u64 {
    let Some(value) = header else {
        return DEFAULT_RETRY_AFTER_SECS;
    };
    let value = value.trim();

    if let Ok(secs) = value.parse::<i64>() {
        return secs.max(0) as u64;
    }

    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        let delta = (at.with_timezone(&Utc) - now).num_seconds() + DATE_BUFFER_SECS;
        return delta.max(1) as u64;
    }

    tracing::debug!(header = %value, "Unparseable Retry-After header, using default");
    DEFAULT_RETRY_AFTER_SECS
}
