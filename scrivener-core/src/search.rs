//! The search capability: the `SearchProvider` trait and a scripted mock.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// A single document returned by a search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub title: String,
    /// URL or other stable identifier. Used for deduplication.
    pub url: String,
    pub snippet: String,
    /// Full or raw page content, when the backend provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl SearchDocument {
    pub fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            content: None,
            score: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Trait for search backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query, returning at most `limit` documents.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchDocument>, ProviderError>;

    /// Backend name, used in logs and diagnostics.
    fn provider_name(&self) -> &str;
}

type SearchHandler = dyn Fn(&str) -> Result<Vec<SearchDocument>, ProviderError> + Send + Sync;
type SearchLatencyFn = dyn Fn(&str) -> Duration + Send + Sync;

/// A mock search provider for testing.
///
/// Results come from the FIFO queue first, then the handler, else an empty list.
pub struct MockSearchProvider {
    name: String,
    results: Mutex<VecDeque<Result<Vec<SearchDocument>, ProviderError>>>,
    handler: Option<Box<SearchHandler>>,
    latency: Option<Box<SearchLatencyFn>>,
    queries: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    /// A provider that returns no results for every query.
    pub fn empty() -> Self {
        Self {
            name: "mock-search".to_string(),
            results: Mutex::new(VecDeque::new()),
            handler: None,
            latency: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose results are computed from each query.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<SearchDocument>, ProviderError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::empty()
        }
    }

    /// A provider that derives one distinct document per query.
    pub fn echo() -> Self {
        Self::with_handler(|query| {
            let slug: String = query
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                .collect();
            Ok(vec![SearchDocument::new(
                format!("Result for {query}"),
                format!("https://example.com/{slug}"),
                format!("Findings about {query}."),
            )])
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_latency<F>(mut self, latency: F) -> Self
    where
        F: Fn(&str) -> Duration + Send + Sync + 'static,
    {
        self.latency = Some(Box::new(latency));
        self
    }

    pub fn queue_results(&self, docs: Vec<SearchDocument>) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(docs));
    }

    pub fn queue_error(&self, error: ProviderError) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(error));
    }

    /// Every query received so far, in arrival order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::empty()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchDocument>, ProviderError> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_string());

        if let Some(latency) = &self.latency {
            let delay = latency(query);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let queued = self
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let docs = match queued {
            Some(result) => result?,
            None => match &self.handler {
                Some(handler) => handler(query)?,
                None => Vec::new(),
            },
        };
        Ok(docs.into_iter().take(limit).collect())
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}
