//! Retry policy for outbound HTTP calls.

use std::time::Duration;

use reqwest::StatusCode;

/// What a single attempt produced, as seen by the retry predicate.
#[derive(Debug, Clone, Copy)]
pub enum Attempt {
    /// The request never produced a response (connect, timeout, reset).
    Transport,
    /// A response arrived with this status.
    Status(StatusCode),
}

/// Delay before retry `n` (1-based).
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// `step * n`, capped at `max`.
    Linear { step: Duration, max: Duration },
    Fixed(Duration),
}

impl Backoff {
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Linear { step, max } => step.saturating_mul(retry).min(max),
            Backoff::Fixed(d) => d,
        }
    }
}

/// Fixed-count retry policy injected into HTTP clients.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retry_on: fn(Attempt) -> bool,
}

/// Retry transport failures and 5xx responses.
pub fn transient(attempt: Attempt) -> bool {
    match attempt {
        Attempt::Transport => true,
        Attempt::Status(status) => status.is_server_error(),
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Linear {
                step: Duration::from_secs(1),
                max: Duration::from_secs(5),
            },
            retry_on: transient,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, never retried.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::Fixed(Duration::ZERO),
            retry_on: transient,
        }
    }

    /// How long to wait before retry number `retry`, or `None` to give up.
    pub fn next_delay(&self, retry: u32, attempt: Attempt) -> Option<Duration> {
        if retry > self.max_retries || !(self.retry_on)(attempt) {
            return None;
        }
        Some(self.backoff.delay(retry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff_is_capped() {
        let backoff = Backoff::Linear {
            step: Duration::from_secs(2),
            max: Duration::from_secs(5),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(5));
        assert_eq!(backoff.delay(100), Duration::from_secs(5));
    }

    #[test]
    fn test_default_retries_server_errors_only() {
        let policy = RetryPolicy::default();
        let server_error = Attempt::Status(StatusCode::BAD_GATEWAY);
        assert_eq!(policy.next_delay(1, server_error), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(3, Attempt::Transport), Some(Duration::from_secs(3)));
        assert_eq!(policy.next_delay(4, server_error), None);
        assert_eq!(policy.next_delay(1, Attempt::Status(StatusCode::BAD_REQUEST)), None);
        assert_eq!(policy.next_delay(1, Attempt::Status(StatusCode::TOO_MANY_REQUESTS)), None);
    }

    #[test]
    fn test_none_never_retries() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.next_delay(1, Attempt::Transport), None);
    }
}
