//! SDK call layer: timeout, retry and status mapping.
//!
//! This is the ONLY place where SDK statuses and native fetch errors become
//! failures. gateway/mod.rs only picks which statuses an operation accepts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::SdkError;
use crate::result::{Failure, MediationResult};
use crate::sdk::{TokenFetchResult, TokenFetchStatus};

use super::AttestationGateway;

/// Upper bound for a single backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

enum Attempt {
    Completed(TokenFetchResult),
    TimedOut,
}

impl AttestationGateway {
    /// Run an SDK fetch under the gateway's timeout and retry policy.
    ///
    /// Network statuses and timeouts are retried with jittered exponential
    /// backoff. Once retries are exhausted a network status is returned as
    /// is and a timeout becomes a `Network` failure. Native errors are never
    /// retried.
    pub(super) async fn fetch_with_policy<F, Fut>(
        &self,
        op: &str,
        fetch: F,
    ) -> MediationResult<TokenFetchResult>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<TokenFetchResult, SdkError>>,
    {
        let timeout = self.inner.settings.timeout();
        let max_retries = self.inner.settings.max_retries;
        let mut retries = 0;

        loop {
            let attempt = match tokio::time::timeout(timeout, fetch()).await {
                Ok(Ok(result)) => Attempt::Completed(result),
                Ok(Err(e)) => return Err(Failure::general(format!("{} {}", op, e))),
                Err(_) => Attempt::TimedOut,
            };

            if let Attempt::Completed(result) = &attempt {
                if result.config_changed {
                    self.handle_config_update().await;
                }
            }

            let condition = match &attempt {
                Attempt::Completed(result) if result.status.is_network() => {
                    Some(result.status.as_str())
                }
                Attempt::Completed(_) => None,
                Attempt::TimedOut => Some("TIMEOUT"),
            };

            if let Some(condition) = condition {
                if retries < max_retries {
                    retries += 1;
                    let backoff = backoff(self.inner.settings.retry_backoff_ms, retries);

                    warn!(
                        op,
                        condition,
                        retry = retries,
                        max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "attestation fetch failed on network, retrying"
                    );

                    tokio::time::sleep(backoff).await;
                    continue;
                }
            }

            return match attempt {
                Attempt::Completed(result) => Ok(result),
                Attempt::TimedOut => Err(Failure::network(format!(
                    "{}: timed out after {}ms",
                    op,
                    timeout.as_millis()
                ))),
            };
        }
    }
}

/// Exponential backoff with full jitter, capped at [`MAX_BACKOFF`].
fn backoff(base_ms: u64, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(16);
    let base = Duration::from_millis(base_ms.saturating_mul(1 << exponent)).min(MAX_BACKOFF);
    let jittered_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
    Duration::from_millis(jittered_ms)
}

/// Failure for a result whose status the operation does not accept.
pub(super) fn status_failure(op: &str, result: &TokenFetchResult) -> Failure {
    match result.status {
        TokenFetchStatus::Rejected => Failure::rejection(
            format!(
                "{}: {}: {} {}",
                op, result.status, result.arc, result.rejection_reasons
            ),
            result.arc.clone(),
            result.rejection_reasons.clone(),
        ),
        status if status.is_network() => Failure::network(format!("{}: {}", op, status)),
        status => Failure::general(format!("{}: {}", op, status)),
    }
}

/// Accept the listed statuses, map anything else to a failure.
pub(super) fn expect_status(
    op: &str,
    result: &TokenFetchResult,
    accepted: &[TokenFetchStatus],
) -> MediationResult<()> {
    if accepted.contains(&result.status) {
        Ok(())
    } else {
        Err(status_failure(op, result))
    }
}
