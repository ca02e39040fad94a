//! Error types for the Scrivener orchestration core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering capability providers, planning, per-section research, report
//! compilation, run control, checkpointing, and configuration.

/// Top-level error type for the Scrivener core library.
#[derive(Debug, thiserror::Error)]
pub enum ScrivenerError {
    #[error("Plan generation failed: {0}")]
    PlanGeneration(#[from] PlanGenerationError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Invalid resume: {0}")]
    InvalidResume(#[from] InvalidResumeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScrivenerError {
    /// Whether the underlying cause is a transient provider failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrivenerError::Provider(e) => e.is_retryable(),
            ScrivenerError::PlanGeneration(PlanGenerationError::Provider(e)) => e.is_retryable(),
            ScrivenerError::Research(ResearchError::Provider { source, .. }) => {
                source.is_retryable()
            }
            ScrivenerError::Compile(CompileError::Provider(e)) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Errors from completion and search capability calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Model not supported: {model}")]
    UnsupportedModel { model: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

impl ProviderError {
    /// Transient failures worth retrying with backoff. Auth and parse errors are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Connection { .. }
                | ProviderError::Timeout { .. }
        )
    }
}

/// Errors from the plan stage.
#[derive(Debug, thiserror::Error)]
pub enum PlanGenerationError {
    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("planner output could not be parsed: {message}")]
    Unparseable { message: String },

    #[error("planner returned an empty plan")]
    Empty,
}

/// Errors from a per-section research loop.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("section '{section}': provider call failed: {source}")]
    Provider {
        section: String,
        source: ProviderError,
    },

    #[error("section '{section}': malformed {stage} output: {message}")]
    MalformedResponse {
        section: String,
        stage: String,
        message: String,
    },

    #[error("section '{section}': illegal status transition from {from} to {to}")]
    IllegalTransition {
        section: String,
        from: String,
        to: String,
    },
}

/// Errors from final report assembly.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("research sections without content: {}", .sections.join(", "))]
    IncompleteSections { sections: Vec<String> },

    #[error("section '{section}' produced no text")]
    EmptySection { section: String },

    #[error(transparent)]
    Section(#[from] ResearchError),

    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),
}

/// A resume signal that cannot be applied to the run's current phase.
#[derive(Debug, thiserror::Error)]
pub enum InvalidResumeError {
    #[error("run {run_id} has no pending interrupt (phase: {phase})")]
    NoPendingInterrupt { run_id: String, phase: String },

    #[error("signal '{signal}' cannot be applied to run {run_id} in phase {phase}")]
    IncompatibleSignal {
        run_id: String,
        phase: String,
        signal: String,
    },
}

/// Errors from the run control surface.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Run already exists: {run_id}")]
    RunAlreadyExists { run_id: String },

    #[error("Run {run_id} was cancelled")]
    Cancelled { run_id: String },

    #[error("Run {run_id} cannot continue from phase {phase}")]
    NotContinuable { run_id: String, phase: String },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Research task failed: {message}")]
    TaskFailed { message: String },
}

/// Errors from checkpoint persistence.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("checkpoint for run {run_id} failed integrity verification")]
    IntegrityViolation { run_id: String },

    #[error("unsupported checkpoint format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Unknown {kind} provider: {name}")]
    UnknownProvider { kind: String, name: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

/// Convenience type alias for Results using ScrivenerError.
pub type Result<T> = std::result::Result<T, ScrivenerError>;
