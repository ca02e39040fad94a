//! Configuration system for Scrivener.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/scrivener/config.toml` and/or
//! `.scrivener/config.toml` in the workspace directory.

use crate::error::ConfigError;
use crate::types::ModelSelector;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Built-in report structure used when a run does not supply its own.
pub const DEFAULT_REPORT_STRUCTURE: &str = "Use this structure to create a report on the user-provided topic:

1. Introduction (no research needed)
   - Brief overview of the topic area

2. Main Body Sections:
   - Each section should focus on a sub-topic of the user-provided topic

3. Conclusion
   - Aim for 1 structural element (either a list or table) that distills the main body sections
   - Provide a concise summary of the report";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrivenerConfig {
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What a research section does when it reaches the depth bound without a passing grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Keep the latest draft and mark the section complete.
    #[default]
    BestEffort,
    /// Mark the section failed. Its draft is still compiled.
    Fail,
}

/// Per-run research configuration. Captured into the run when it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Search backend name as registered in the provider registry.
    pub search_api: String,
    /// Model used for plan generation.
    pub planner: ModelSelector,
    /// Model used for queries, drafting, grading, and structural sections.
    pub writer: ModelSelector,
    /// Maximum research iterations per section.
    pub max_search_depth: u32,
    /// Queries generated per research iteration.
    pub number_of_queries: usize,
    /// Results requested per search query.
    pub search_result_limit: usize,
    /// Token cap applied to each source body before it reaches a prompt.
    pub max_tokens_per_source: usize,
    /// Upper bound on concurrently running section research loops.
    pub max_concurrent_sections: usize,
    /// Custom report structure. `None` uses [`DEFAULT_REPORT_STRUCTURE`].
    pub report_structure: Option<String>,
    /// Run a context search before planning.
    pub planner_context_search: bool,
    pub exhaustion_policy: ExhaustionPolicy,
    pub retry: RetryConfig,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            search_api: "tavily".to_string(),
            planner: ModelSelector::new("openai", "o4-mini"),
            writer: ModelSelector::new("openai", "gpt-4.1-mini"),
            max_search_depth: 2,
            number_of_queries: 2,
            search_result_limit: 5,
            max_tokens_per_source: 1000,
            max_concurrent_sections: 4,
            report_structure: None,
            planner_context_search: true,
            exhaustion_policy: ExhaustionPolicy::BestEffort,
            retry: RetryConfig::default(),
        }
    }
}

impl ResearchConfig {
    /// The report structure to plan against.
    pub fn report_structure(&self) -> &str {
        self.report_structure
            .as_deref()
            .unwrap_or(DEFAULT_REPORT_STRUCTURE)
    }

    /// Reject configurations the research stages cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_search_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "research.max_search_depth".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.number_of_queries == 0 {
            return Err(ConfigError::Invalid {
                field: "research.number_of_queries".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.max_concurrent_sections == 0 {
            return Err(ConfigError::Invalid {
                field: "research.max_concurrent_sections".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "research.retry.backoff_multiplier".into(),
                reason: format!("{} is below 1.0", self.retry.backoff_multiplier),
            });
        }
        Ok(())
    }

    /// Non-fatal observations about the configuration.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_search_depth > 10 {
            warnings.push(format!(
                "max_search_depth is {}; each iteration costs a search round and three completions",
                self.max_search_depth
            ));
        }
        if self.search_result_limit == 0 {
            warnings.push("search_result_limit is 0; sections will never gather sources".into());
        }
        if let Some(structure) = &self.report_structure {
            if structure.trim().is_empty() {
                warnings.push("report_structure is empty; the default will not be used".into());
            }
        }
        warnings
    }
}

/// Retry policy for transient provider errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Where checkpoints are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory for file-backed checkpoints. `None` keeps checkpoints in memory.
    pub dir: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

fn default_checkpoint_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "scrivener", "scrivener")
        .map(|dirs| dirs.data_dir().join("checkpoints"))
}

/// Logging configuration consumed by [`crate::logging::init_logging`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rolling JSON logs. `None` disables the file layer.
    pub json_dir: Option<PathBuf>,
    /// File name prefix for JSON logs.
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_dir: None,
            file_prefix: "scrivener.log".to_string(),
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SCRIVENER_`)
/// 3. Workspace-local config (`.scrivener/config.toml`)
/// 4. User config (`~/.config/scrivener/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ScrivenerConfig>,
) -> Result<ScrivenerConfig, Box<figment::Error>> {
    // A missing .env is not an error.
    let _ = dotenvy::dotenv();

    let mut figment = Figment::from(Serialized::defaults(ScrivenerConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "scrivener", "scrivener") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".scrivener").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (SCRIVENER_RESEARCH__MAX_SEARCH_DEPTH, etc.)
    figment = figment.merge(Env::prefixed("SCRIVENER_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load and validate in one step, mapping figment failures into [`ConfigError`].
pub fn load_validated(
    workspace: Option<&Path>,
    overrides: Option<&ScrivenerConfig>,
) -> Result<ScrivenerConfig, ConfigError> {
    let config = load_config(workspace, overrides).map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })?;
    config.research.validate()?;
    for warning in config.research.warnings() {
        tracing::warn!(warning = %warning, "Configuration warning");
    }
    Ok(config)
}
