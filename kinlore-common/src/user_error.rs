//! User-facing error categorization
//!
//! Raw errors from the network stack, the hosted store or upstream APIs are
//! mapped onto a handful of categories by message heuristics. Each category
//! has one fixed message suitable for a toast or alert.

use serde::Serialize;
use std::fmt;

/// Coarse error category shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    AuthExpired,
    RateLimited,
    Unknown,
}

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "deadline has elapsed"];

const AUTH_MARKERS: &[&str] = &[
    "jwt expired",
    "token expired",
    "session expired",
    "invalid refresh token",
    "unauthorized",
    "401",
];

const RATE_LIMIT_MARKERS: &[&str] = &["429", "too many requests", "rate limit"];

const NETWORK_MARKERS: &[&str] = &[
    "network",
    "failed to fetch",
    "connection",
    "dns error",
    "error sending request",
    "unreachable",
];

impl ErrorCategory {
    /// Message shown to the user for this category
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::Network => {
                "We couldn't reach the server. Check your internet connection and try again."
            }
            ErrorCategory::Timeout => "This is taking longer than expected. Please try again.",
            ErrorCategory::AuthExpired => "Your session has expired. Please sign in again.",
            ErrorCategory::RateLimited => {
                "We're handling a lot of requests right now. Please wait a moment and try again."
            }
            ErrorCategory::Unknown => "Something went wrong. Please try again.",
        }
    }

    /// Worth retrying automatically
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::RateLimited
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::AuthExpired => "auth_expired",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Categorize a raw error message
///
/// Checked in order timeout, auth, rate limit, network: "connection timed
/// out" is a timeout, not a generic network failure.
pub fn categorize(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if has(TIMEOUT_MARKERS) {
        ErrorCategory::Timeout
    } else if has(AUTH_MARKERS) {
        ErrorCategory::AuthExpired
    } else if has(RATE_LIMIT_MARKERS) {
        ErrorCategory::RateLimited
    } else if has(NETWORK_MARKERS) {
        ErrorCategory::Network
    } else {
        ErrorCategory::Unknown
    }
}

/// Categorize an error, consulting its whole source chain
///
/// The first link that yields a known category wins.
pub fn categorize_error(error: &(dyn std::error::Error + 'static)) -> ErrorCategory {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        let category = categorize(&err.to_string());
        if category != ErrorCategory::Unknown {
            return category;
        }
        current = err.source();
    }
    ErrorCategory::Unknown
}

/// Category plus message, ready to hand to a client
#[derive(Debug, Clone, Serialize)]
pub struct UserFacingError {
    pub category: ErrorCategory,
    pub message: &'static str,
    pub retryable: bool,
}

impl From<ErrorCategory> for UserFacingError {
    fn from(category: ErrorCategory) -> Self {
        Self {
            category,
            message: category.user_message(),
            retryable: category.is_retryable(),
        }
    }
}
