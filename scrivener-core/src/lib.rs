//! # Scrivener Core
//!
//! Core library for Scrivener, a resumable research-report generator.
//! A run plans a report, suspends for human review of the plan, researches
//! every section in parallel (query, search, write, grade), and assembles the
//! final document. Run state is checkpointed throughout, so runs survive
//! process restarts.

pub mod brain;
pub mod config;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod search;
pub mod types;
pub mod workflow;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider, TokenCounter};
pub use config::{
    CheckpointConfig, ExhaustionPolicy, LoggingConfig, ResearchConfig, RetryConfig,
    ScrivenerConfig, load_config, load_validated,
};
pub use error::{Result, ScrivenerError};
pub use logging::init_logging;
pub use providers::{ProviderRegistry, StageProviders};
pub use research::{
    Document, Plan, PlannedSection, Section, SectionOutcome, SectionStatus, Source,
};
pub use search::{MockSearchProvider, SearchDocument, SearchProvider};
pub use types::{CompletionPurpose, CompletionRequest, CompletionResponse, Message, ModelSelector, Role};
pub use workflow::{
    CheckpointStore, FeedbackSignal, FileCheckpointStore, Interrupt, MemoryCheckpointStore,
    Orchestrator, RunId, RunPhase, RunState, RunStatus,
};
