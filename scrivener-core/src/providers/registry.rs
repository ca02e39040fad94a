//! Name-keyed registry of completion and search backends.

use crate::brain::LlmProvider;
use crate::config::ResearchConfig;
use crate::error::ConfigError;
use crate::search::SearchProvider;
use crate::types::ModelSelector;
use std::collections::HashMap;
use std::sync::Arc;

/// Registered capability backends.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    completion: HashMap<String, Arc<dyn LlmProvider>>,
    search: HashMap<String, Arc<dyn SearchProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completion backend under a provider name.
    pub fn register_completion(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.completion.insert(name.into(), provider);
    }

    /// Register a search backend under a search-API name.
    pub fn register_search(&mut self, name: impl Into<String>, provider: Arc<dyn SearchProvider>) {
        self.search.insert(name.into(), provider);
    }

    /// Builder-style variant of [`register_completion`](Self::register_completion).
    pub fn with_completion(mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.register_completion(name, provider);
        self
    }

    /// Builder-style variant of [`register_search`](Self::register_search).
    pub fn with_search(mut self, name: impl Into<String>, provider: Arc<dyn SearchProvider>) -> Self {
        self.register_search(name, provider);
        self
    }

    pub fn completion(&self, name: &str) -> Result<Arc<dyn LlmProvider>, ConfigError> {
        self.completion
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownProvider {
                kind: "completion".into(),
                name: name.into(),
            })
    }

    pub fn search(&self, name: &str) -> Result<Arc<dyn SearchProvider>, ConfigError> {
        self.search
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownProvider {
                kind: "search".into(),
                name: name.into(),
            })
    }

    /// Names of registered completion backends, sorted.
    pub fn completion_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.completion.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of registered search backends, sorted.
    pub fn search_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.search.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pick the planner, writer, and search backends a run's configuration asks for.
    pub fn resolve(&self, config: &ResearchConfig) -> Result<StageProviders, ConfigError> {
        Ok(StageProviders {
            planner: self.completion(&config.planner.provider)?,
            planner_model: config.planner.clone(),
            writer: self.completion(&config.writer.provider)?,
            writer_model: config.writer.clone(),
            search: self.search(&config.search_api)?,
        })
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("completion", &self.completion_names())
            .field("search", &self.search_names())
            .finish()
    }
}

/// The backends one run uses, resolved from its configuration.
#[derive(Clone)]
pub struct StageProviders {
    pub planner: Arc<dyn LlmProvider>,
    pub planner_model: ModelSelector,
    pub writer: Arc<dyn LlmProvider>,
    pub writer_model: ModelSelector,
    pub search: Arc<dyn SearchProvider>,
}
