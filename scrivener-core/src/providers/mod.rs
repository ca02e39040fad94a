//! Capability wiring: the provider registry and retry with backoff.
//!
//! Completion backends are registered by provider name and search backends by
//! search-API name. A run's [`ResearchConfig`] selects one completion backend
//! for planning, one for writing, and one search backend; see
//! [`ProviderRegistry::resolve`].

pub mod registry;

use crate::brain::LlmProvider;
use crate::error::ProviderError;
use crate::types::CompletionRequest;
use std::future::Future;
use std::time::Duration;

pub use crate::config::RetryConfig;
pub use registry::{ProviderRegistry, StageProviders};

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `ProviderError::RateLimited` (respects `retry_after_secs`),
/// `ProviderError::Connection`, and `ProviderError::Timeout`. Permanent errors
/// (auth, parse) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_retryable() || attempt == config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ProviderError::Connection {
        message: "All retry attempts exhausted".to_string(),
    }))
}

/// Issue one completion under the retry policy and return its text.
pub async fn complete_text(
    provider: &dyn LlmProvider,
    request: CompletionRequest,
    retry: &RetryConfig,
) -> Result<String, ProviderError> {
    let purpose = request.purpose;
    let response = with_retry(retry, || provider.complete(request.clone())).await?;
    tracing::debug!(
        provider = provider.provider_name(),
        purpose = %purpose,
        model = %response.model,
        output_tokens = response.usage.output_tokens,
        "Completion finished"
    );
    Ok(response.message.content)
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &ProviderError) -> u64 {
    if let ProviderError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs * 1000;
        let computed = compute_exponential_backoff(config, attempt);
        return server_ms.max(computed);
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand::random::<f64>()) as u64;
        capped + jitter
    } else {
        capped
    }
}
