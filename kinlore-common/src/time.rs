//! Timestamp utilities

use chrono::{DateTime, Duration, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Timestamp `days` days after `from`
pub fn days_after(from: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    from + Duration::days(days)
}
