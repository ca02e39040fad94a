//! The completion capability: the `LlmProvider` trait, a scripted mock, and token counting.
//!
//! The research stages never talk to a model backend directly; they issue
//! role-tagged [`CompletionRequest`]s through this trait. Backends are selected
//! per stage through the [`crate::providers::ProviderRegistry`].

use crate::error::ProviderError;
use crate::types::{CompletionPurpose, CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Trait for completion backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Provider name, used in logs and diagnostics.
    fn provider_name(&self) -> &str;

    /// Estimate the token count for a set of messages.
    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        // ~4 chars per token plus per-message overhead
        messages.iter().map(|m| m.content.len() / 4 + 4).sum::<usize>() + 3
    }
}

/// Token counter using tiktoken-rs for BPE tokenization.
///
/// Falls back to a character estimate when no encoding can be loaded.
pub struct TokenCounter {
    bpe: Option<tiktoken_rs::CoreBPE>,
}

impl TokenCounter {
    /// Create a token counter for the given model.
    /// Falls back to cl100k_base if the model isn't recognized.
    pub fn for_model(model: &str) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .ok();
        Self { bpe }
    }

    /// Count the number of tokens in a string.
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.chars().count().div_ceil(4),
        }
    }

    /// Truncate `text` to at most `max_tokens` tokens, cutting on a char boundary.
    ///
    /// Returns the text unchanged when it already fits.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> (String, bool) {
        let total = self.count(text);
        if total <= max_tokens {
            return (text.to_string(), false);
        }
        if max_tokens == 0 {
            return (String::new(), true);
        }

        // Scale by the observed chars-per-token ratio, then shrink until it fits.
        let chars: Vec<char> = text.chars().collect();
        let mut keep = chars.len() * max_tokens / total;
        loop {
            let candidate: String = chars[..keep].iter().collect();
            if keep == 0 || self.count(&candidate) <= max_tokens {
                return (candidate, true);
            }
            keep = keep * 9 / 10;
        }
    }
}

type ResponseHandler = dyn Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync;
type LatencyFn = dyn Fn(&CompletionRequest) -> Duration + Send + Sync;

/// A mock completion provider for testing and development.
///
/// Responses come from, in order: the FIFO queue, the handler, the fallback text.
/// Every request is recorded so tests can assert on call counts per purpose.
pub struct MockLlmProvider {
    name: String,
    responses: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
    handler: Option<Box<ResponseHandler>>,
    latency: Option<Box<LatencyFn>>,
    fallback: String,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            responses: Mutex::new(VecDeque::new()),
            handler: None,
            latency: None,
            fallback: "I'm a mock LLM. No queued responses available.".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        Self {
            fallback: text.to_string(),
            ..Self::new()
        }
    }

    /// Create a provider whose responses are computed from each request.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Register under a different provider name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Delay each call by a request-dependent duration.
    pub fn with_latency<F>(mut self, latency: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Duration + Send + Sync + 'static,
    {
        self.latency = Some(Box::new(latency));
        self
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock_responses().push_back(Ok(response));
    }

    /// Queue a text response.
    pub fn queue_text(&self, text: &str) {
        self.queue_response(Self::text_response(text));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: ProviderError) {
        self.lock_responses().push_back(Err(error));
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// All requests received so far.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received for the given purpose.
    pub fn call_count(&self, purpose: CompletionPurpose) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.purpose == purpose)
            .count()
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<CompletionResponse, ProviderError>>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(latency) = &self.latency {
            let delay = latency(&request);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if let Some(queued) = self.lock_responses().pop_front() {
            return queued;
        }
        if let Some(handler) = &self.handler {
            return handler(&request).map(|text| Self::text_response(&text));
        }
        Ok(Self::text_response(&self.fallback))
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_fallback() {
        let provider = MockLlmProvider::with_response("hello");
        let resp = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        assert_eq!(resp.text(), "hello");
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_provider_queue_before_handler() {
        let provider = MockLlmProvider::with_handler(|_| Ok("from handler".into()));
        provider.queue_text("queued");
        provider.queue_error(ProviderError::Timeout { timeout_secs: 1 });

        let first = provider.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(first.text(), "queued");

        let second = provider.complete(CompletionRequest::default()).await;
        assert!(matches!(second, Err(ProviderError::Timeout { .. })));

        let third = provider.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(third.text(), "from handler");
    }

    #[tokio::test]
    async fn test_mock_provider_counts_by_purpose() {
        let provider = MockLlmProvider::new();
        for purpose in [
            CompletionPurpose::Plan,
            CompletionPurpose::Plan,
            CompletionPurpose::SectionGrade,
        ] {
            let req = CompletionRequest::new(purpose, "sys", "user");
            provider.complete(req).await.unwrap();
        }
        assert_eq!(provider.call_count(CompletionPurpose::Plan), 2);
        assert_eq!(provider.call_count(CompletionPurpose::SectionGrade), 1);
        assert_eq!(provider.call_count(CompletionPurpose::SectionWrite), 0);
    }

    #[test]
    fn test_default_estimate_tokens() {
        let provider = MockLlmProvider::new();
        let estimate = provider.estimate_tokens(&[Message::user("a".repeat(400))]);
        assert_eq!(estimate, 100 + 4 + 3);
    }

    #[test]
    fn test_token_counter_counts() {
        let counter = TokenCounter::for_model("gpt-4o");
        assert!(counter.count("Hello, world!") > 0);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn test_token_counter_truncate_fits() {
        let counter = TokenCounter::for_model("gpt-4o");
        let (text, truncated) = counter.truncate("short text", 100);
        assert_eq!(text, "short text");
        assert!(!truncated);
    }

    #[test]
    fn test_token_counter_truncate_long() {
        let counter = TokenCounter::for_model("unknown-model");
        let long = "research findings about distributed systems ".repeat(200);
        let (text, truncated) = counter.truncate(&long, 50);
        assert!(truncated);
        assert!(counter.count(&text) <= 50);
        assert!(long.starts_with(&text));
    }
}
