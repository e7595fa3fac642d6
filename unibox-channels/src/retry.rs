//! Retrying send wrapper
//!
//! The adapters send exactly once; this wrapper owns the retry loop and
//! delegates every decision to the pure policy in `unibox_core::retry`.
//! Backoff sleeps block only the calling background task, never an
//! inbound request.

use tracing::{debug, warn};
use unibox_core::retry::{RetryDecision, RetryPolicy};

use crate::base::{ChannelAdapter, DeliveryError, DeliveryReceipt, Result};

/// Send a message through an adapter with bounded retries
///
/// Transient failures (network, 5xx, rate limiting) are retried up to
/// `policy.max_attempts` with exponential backoff; client errors fail
/// immediately. Exhausting the attempts yields
/// [`DeliveryError::RetriesExhausted`] naming the last underlying error.
pub async fn send_with_retry(
    adapter: &dyn ChannelAdapter,
    recipient: &str,
    content: &str,
    media: &[String],
    policy: &RetryPolicy,
) -> Result<DeliveryReceipt> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match adapter.send_message(recipient, content, media).await {
            Ok(receipt) => {
                if attempt > 1 {
                    debug!(
                        channel = adapter.name(),
                        attempt, "delivery succeeded after retry"
                    );
                }
                return Ok(receipt);
            }
            Err(err) => match policy.decide(err.kind(), attempt) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        channel = adapter.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "delivery attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    if err.kind() == unibox_core::ErrorKind::Transient && attempt > 1 {
                        return Err(DeliveryError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }
                    return Err(err);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let adapter = MockAdapter::new("mock", "secret");
        adapter.fail_next(DeliveryError::Network("reset".into()));
        adapter.fail_next(DeliveryError::Server { status: 502 });

        let receipt = send_with_retry(
            &adapter,
            "user1",
            "hello",
            &[],
            &RetryPolicy::instant(),
        )
        .await
        .unwrap();

        assert_eq!(receipt.recipient, "user1");
        assert_eq!(adapter.send_attempts(), 3);
    }

    #[tokio::test]
    async fn test_no_fourth_attempt_after_three_failures() {
        let adapter = MockAdapter::new("mock", "secret");
        for _ in 0..3 {
            adapter.fail_next(DeliveryError::Network("down".into()));
        }

        let err = send_with_retry(
            &adapter,
            "user1",
            "hello",
            &[],
            &RetryPolicy::instant(),
        )
        .await
        .unwrap_err();

        assert_eq!(adapter.send_attempts(), 3);
        match err {
            DeliveryError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, DeliveryError::Network(_)));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let adapter = MockAdapter::new("mock", "secret");
        adapter.fail_next(DeliveryError::Client {
            status: 403,
            message: "blocked".into(),
        });

        let err = send_with_retry(
            &adapter,
            "user1",
            "hello",
            &[],
            &RetryPolicy::instant(),
        )
        .await
        .unwrap_err();

        assert_eq!(adapter.send_attempts(), 1);
        assert!(matches!(err, DeliveryError::Client { status: 403, .. }));
    }
}
