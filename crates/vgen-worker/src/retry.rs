//! Retry utilities with exponential backoff.
//!
//! [`retry_async`] retries any fallible operation (store writes).
//! [`retry_with_fallback`] drives the LLM stages: transient errors back off
//! on the same provider, malformed output moves on to the next one.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use vgen_models::ErrorKind;

use crate::cancel::CancelToken;
use crate::error::StageFailure;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Operation failed after all retries exhausted.
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::Failed { error, .. } => Err(error),
        }
    }
}

/// Execute an async operation, retrying every error up to `max_retries` times.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) if attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                attempt += 1;
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return RetryResult::Failed {
                    error: e,
                    attempts: attempt + 1,
                }
            }
        }
    }
}

/// Outcome of [`retry_with_fallback`].
#[derive(Debug)]
pub struct FallbackOutcome<T, E> {
    pub result: Result<T, E>,
    /// Calls made, including the first
    pub attempts: u32,
    /// Index of the provider used by the last call
    pub provider_index: usize,
    /// Times the operation moved on to another provider
    pub fallbacks: u32,
}

impl<T, E> FallbackOutcome<T, E> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Run `operation(provider_index)` across `candidates` providers.
///
/// At most `max_retries + 1` calls are made in total:
/// - transient errors sleep with backoff and retry the same provider
/// - malformed errors move to the next provider without sleeping; if none
///   is left the last error is returned
/// - fatal (and advisory) errors return immediately
///
/// Cancellation is checked after every failed call and during backoff.
pub async fn retry_with_fallback<F, Fut, T, E>(
    config: &RetryConfig,
    candidates: usize,
    cancel: &CancelToken,
    mut operation: F,
) -> FallbackOutcome<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StageFailure,
{
    let candidates = candidates.max(1);
    let max_attempts = config.max_retries + 1;
    let mut provider_index = 0usize;
    let mut attempts = 0u32;
    let mut fallbacks = 0u32;
    let mut backoff_step = 0u32;

    loop {
        attempts += 1;
        let result = operation(provider_index).await;

        let error = match result {
            Ok(value) => {
                return FallbackOutcome {
                    result: Ok(value),
                    attempts,
                    provider_index,
                    fallbacks,
                }
            }
            Err(e) => e,
        };

        let kind = error.kind();
        let exhausted = attempts >= max_attempts;
        let give_up = match kind {
            ErrorKind::Transient => exhausted,
            ErrorKind::Malformed => exhausted || provider_index + 1 >= candidates,
            ErrorKind::Fatal | ErrorKind::Advisory => true,
        };

        if give_up || cancel.is_cancelled() {
            warn!(
                operation = %config.operation_name,
                attempts,
                kind = %kind,
                "Giving up: {}", error
            );
            return FallbackOutcome {
                result: Err(error),
                attempts,
                provider_index,
                fallbacks,
            };
        }

        if kind == ErrorKind::Malformed {
            provider_index += 1;
            fallbacks += 1;
            backoff_step = 0;
            debug!(
                operation = %config.operation_name,
                provider_index,
                "Malformed output, trying next provider: {}", error
            );
            continue;
        }

        let delay = config.delay_for_attempt(backoff_step);
        backoff_step += 1;
        debug!(
            operation = %config.operation_name,
            attempt = attempts,
            "Transient failure, retrying in {:?}: {}", delay, error
        );

        if cancel.sleep_or_cancel(delay).await {
            return FallbackOutcome {
                result: Err(error),
                attempts,
                provider_index,
                fallbacks,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use vgen_providers::ProviderError;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::new("test")
            .with_max_retries(max_retries)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    fn transient() -> ScriptError {
        ScriptError::Provider(ProviderError::unavailable("llm", "503"))
    }

    #[test]
    fn test_retry_config_delay_calculation() {
        let config = RetryConfig::new("test")
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(30), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_async_success_after_failures() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<u32, String> = retry_async(&fast(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome: FallbackOutcome<(), ScriptError> =
            retry_with_fallback(&fast(2), 1, &CancelToken::new(), |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retries(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_advances_provider() {
        let outcome: FallbackOutcome<usize, ScriptError> =
            retry_with_fallback(&fast(3), 3, &CancelToken::new(), |idx| async move {
                if idx < 2 {
                    Err(ScriptError::malformed("no lines"))
                } else {
                    Ok(idx)
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.fallbacks, 2);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_malformed_stops_when_providers_exhausted() {
        let outcome: FallbackOutcome<(), ScriptError> =
            retry_with_fallback(&fast(5), 2, &CancelToken::new(), |_| async {
                Err(ScriptError::malformed("garbage"))
            })
            .await;

        assert!(matches!(outcome.result, Err(ScriptError::Malformed(_))));
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let outcome: FallbackOutcome<(), ScriptError> =
            retry_with_fallback(&fast(5), 3, &CancelToken::new(), |_| async {
                Err(ScriptError::NoProvider)
            })
            .await;

        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_stops_retrying() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome: FallbackOutcome<(), ScriptError> =
            retry_with_fallback(&fast(5), 1, &cancel, |_| async { Err(transient()) }).await;

        assert_eq!(outcome.attempts, 1);
    }
}
