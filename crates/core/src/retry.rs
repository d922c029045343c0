//! Exponential-backoff retry around transient failures.
//!
//! Operations against the CMS and the archival processing service fail for
//! reasons that resolve themselves (connection resets, 5xx responses, gRPC
//! unavailability). Those are retried with a small budget; everything else
//! surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry budget and backoff shape.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is exhausted. Only errors for which `is_transient` returns
/// true are retried.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = policy.initial_delay;
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_transient(&err) || attempt == attempts {
                    return Err(err);
                }
                warn!(%err, attempt, attempts, "transient error, retrying");
                tokio::time::sleep(delay).await;
                delay *= policy.multiplier;
            }
        }
    }
    unreachable!("retry loop always returns")
}

/// Whether an HTTP status is worth retrying.
pub fn http_status_is_transient(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

/// Whether a gRPC status code is worth retrying.
pub fn grpc_code_is_transient(code: tonic::Code) -> bool {
    matches!(
        code,
        tonic::Code::Unavailable
            | tonic::Code::DeadlineExceeded
            | tonic::Code::ResourceExhausted
            | tonic::Code::Unknown
    )
}

/// Substring classification for errors that only carry a message, e.g.
/// output captured from external binaries.
pub fn message_is_transient(message: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "timeout",
        "temporary unavailable",
        "no such host",
        "server misbehaving",
    ];
    if MARKERS.iter().any(|m| message.contains(m)) {
        return true;
    }
    ["500", "502", "503", "504"]
        .iter()
        .any(|code| message.contains(code))
}

/// Classification for reqwest transport errors: connection-level failures
/// and timeouts are transient, protocol/body errors are not.
pub fn reqwest_is_transient(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    if let Some(status) = err.status() {
        return http_status_is_transient(status.as_u16());
    }
    err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum FakeError {
        #[error("connection timeout")]
        Transient,
        #[error("bad input")]
        Fatal,
    }

    fn classify(err: &FakeError) -> bool {
        matches!(err, FakeError::Transient)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(RetryPolicy::default(), classify, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(FakeError::Transient)
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_fails_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(RetryPolicy::default(), classify, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Fatal)
        })
        .await;

        assert!(matches!(result, Err(FakeError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_exhausted_on_persistent_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(RetryPolicy::default(), classify, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Transient)
        })
        .await;

        assert!(matches!(result, Err(FakeError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn message_classification() {
        assert!(message_is_transient("dial tcp: i/o timeout"));
        assert!(message_is_transient("lookup cms: no such host"));
        assert!(message_is_transient("unexpected status 503 from /a/workspace"));
        assert!(!message_is_transient("permission denied"));
    }

    #[test]
    fn grpc_classification() {
        assert!(grpc_code_is_transient(tonic::Code::Unavailable));
        assert!(grpc_code_is_transient(tonic::Code::Unknown));
        assert!(!grpc_code_is_transient(tonic::Code::InvalidArgument));
    }
}
