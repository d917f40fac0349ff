//! `Retry-After` header parsing.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Parses a `Retry-After` value into a wait duration.
///
/// Accepts delay-seconds (integral or fractional, non-negative) or an
/// HTTP-date. Dates in the past yield a zero wait. Anything else is `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        return Duration::try_from_secs_f64(secs).ok();
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&Utc) - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
