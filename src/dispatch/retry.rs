// ABOUTME: Retry policy: exponential backoff with full jitter, idempotency-aware
// ABOUTME: 5xx/429/connect errors retry; other 4xx and invalid bodies never do
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use rand::Rng;
use std::time::Duration;

/// Base delay before the first retry
const BASE_DELAY_MS: u64 = 200;
/// Ceiling on any single backoff sleep
const MAX_DELAY_MS: u64 = 10_000;

/// Classification of an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection-level failure (refused, reset, DNS)
    Connect,
    /// HTTP 5xx
    ServerError,
    /// HTTP 429
    TooManyRequests,
    /// Any other 4xx
    ClientError,
    /// 2xx with an unusable body
    InvalidBody,
}

impl FailureClass {
    /// Classify an HTTP status code
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            429 => Self::TooManyRequests,
            500..=599 => Self::ServerError,
            _ => Self::ClientError,
        }
    }

    /// Whether this class is retriable at all (before idempotency rules)
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Connect | Self::ServerError | Self::TooManyRequests)
    }
}

/// Retry policy for one tool invocation
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempt ceiling beyond the initial call
    pub max_retries: u32,
    /// Whether the operation is idempotent (GET, or explicitly flagged)
    pub idempotent: bool,
}

impl RetryPolicy {
    /// Build a policy. Non-idempotent operations get zero retries regardless
    /// of the configured ceiling.
    #[must_use]
    pub const fn new(max_retries: u32, idempotent: bool) -> Self {
        Self {
            max_retries: if idempotent { max_retries } else { 0 },
            idempotent,
        }
    }

    /// Whether attempt `attempt` (0-based count of retries already done) may
    /// retry after a failure of `class`
    #[must_use]
    pub const fn should_retry(&self, attempt: u32, class: FailureClass) -> bool {
        attempt < self.max_retries && class.is_retriable()
    }

    /// Backoff before retry number `attempt` (1-based): exponential with
    /// full jitter
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(MAX_DELAY_MS);
        let jittered = rand::thread_rng().gen_range(0..=capped);
        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(FailureClass::from_status(429), FailureClass::TooManyRequests);
        assert_eq!(FailureClass::from_status(503), FailureClass::ServerError);
        assert_eq!(FailureClass::from_status(404), FailureClass::ClientError);
        assert!(FailureClass::from_status(502).is_retriable());
        assert!(!FailureClass::from_status(400).is_retriable());
        assert!(!FailureClass::InvalidBody.is_retriable());
    }

    #[test]
    fn non_idempotent_never_retries() {
        let policy = RetryPolicy::new(3, false);
        assert_eq!(policy.max_retries, 0);
        assert!(!policy.should_retry(0, FailureClass::ServerError));
    }

    #[test]
    fn idempotent_retries_up_to_ceiling() {
        let policy = RetryPolicy::new(2, true);
        assert!(policy.should_retry(0, FailureClass::TooManyRequests));
        assert!(policy.should_retry(1, FailureClass::Connect));
        assert!(!policy.should_retry(2, FailureClass::Connect));
        // Client errors never retry even under the ceiling
        assert!(!policy.should_retry(0, FailureClass::ClientError));
    }

    #[test]
    fn backoff_is_bounded() {
        let policy = RetryPolicy::new(5, true);
        for attempt in 0..10 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(MAX_DELAY_MS));
        }
    }
}
