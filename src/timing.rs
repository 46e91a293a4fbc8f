//! Dial timeout and its textual form.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use humanize_rs::ParseError;
use std::{
    fmt::{self, Debug},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

/// Errors parsing a [`DialTimeout`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseDurationError {
    /// Nothing to parse
    #[error("empty duration")]
    Empty,
    /// A bare number that is not a usable count of seconds
    #[error("invalid number of seconds `{0}`")]
    Seconds(String),
    /// Not a humanized duration
    #[error("invalid duration `{input}`: {reason}")]
    Invalid {
        /// What was given
        input: String,
        /// What `humanize_rs` made of it
        reason: String,
    },
    /// The timeout would never let a dial start
    #[error("duration must be positive")]
    Zero,
}

/// How long a single dial may take before giving up.
///
/// Parses either a bare number of seconds (`"10"`, `"0.25"`) or a humanized
/// duration such as `"300ms"` or `"1m30s"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialTimeout(Duration);

impl DialTimeout {
    /// Convenience method to create a `DialTimeout` of the given number of seconds
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// The underlying duration
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Use the timeout to bound a future
    ///
    /// # Errors
    /// Returns an `Err` variant if the future does not finish in time.
    pub async fn timeout<T>(self, future: T) -> Result<T::Output, tokio::time::error::Elapsed>
    where
        T: std::future::Future,
    {
        tokio::time::timeout(self.0, future).await
    }
}

impl From<Duration> for DialTimeout {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl FromStr for DialTimeout {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseDurationError::Empty);
        }
        // Bare numbers are seconds. `humanize_rs` rejects fractions, so
        // catch those here as well.
        let duration = if let Ok(secs) = u64::from_str(s) {
            Duration::from_secs(secs)
        } else if let Ok(secs) = f64::from_str(s) {
            Duration::try_from_secs_f64(secs)
                .map_err(|_| ParseDurationError::Seconds(s.to_string()))?
        } else {
            humanize_rs::duration::parse(s).map_err(|e| invalid(s, &e))?
        };
        if duration.is_zero() {
            return Err(ParseDurationError::Zero);
        }
        Ok(Self(duration))
    }
}

fn invalid(input: &str, err: &ParseError) -> ParseDurationError {
    ParseDurationError::Invalid {
        input: input.to_string(),
        reason: err.to_string(),
    }
}

impl fmt::Display for DialTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
