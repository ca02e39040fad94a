//! Orchestrator: drives runs through their phases and exposes the run control
//! surface.
//!
//! A run advances on its own through planning, research and compilation, and
//! stops only at the plan-review interrupt, on error, or when cancelled.
//! Every phase transition, completed research step and written structural
//! section is checkpointed before the driver moves on, so a fresh
//! orchestrator over the same store can continue any run without repeating
//! finished work.

use super::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use super::run::{FeedbackSignal, Interrupt, RunId, RunPhase, RunState, RunStatus};
use crate::config::{CheckpointConfig, ResearchConfig};
use crate::error::{CompileError, InvalidResumeError, Result, ScrivenerError, WorkflowError};
use crate::providers::{ProviderRegistry, StageProviders};
use crate::research::assembler::{ensure_researched, pending_structural, render_researched};
use crate::research::{Document, Plan, Planner, ReportAssembler, ResearchLoop, Section};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bound on buffered section snapshots between research tasks and the driver.
const PROGRESS_BUFFER: usize = 64;

/// Per-run coordination: one driver at a time, plus the run's cancel token.
struct RunHandle {
    lock: Mutex<()>,
    cancel: CancellationToken,
}

impl RunHandle {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }
}

/// Owns run lifecycles on top of a provider registry and a checkpoint store.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn CheckpointStore>,
    handles: std::sync::Mutex<HashMap<RunId, Arc<RunHandle>>>,
}

impl Orchestrator {
    pub fn new(registry: ProviderRegistry, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            handles: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Orchestrator backed by an in-memory store.
    pub fn in_memory(registry: ProviderRegistry) -> Self {
        Self::new(registry, Arc::new(MemoryCheckpointStore::new()))
    }

    /// Orchestrator with the store selected by `config`.
    pub fn from_config(registry: ProviderRegistry, config: &CheckpointConfig) -> Self {
        let store: Arc<dyn CheckpointStore> = match &config.dir {
            Some(dir) => Arc::new(FileCheckpointStore::new(dir)),
            None => Arc::new(MemoryCheckpointStore::new()),
        };
        Self::new(registry, store)
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Create a run and drive it to its first suspend point.
    pub async fn start(&self, topic: &str, config: ResearchConfig) -> Result<RunId> {
        let run_id = RunId::new();
        self.start_with_id(run_id, topic, config).await?;
        Ok(run_id)
    }

    /// Like [`start`](Self::start) with a caller-chosen id.
    ///
    /// If a run with this id already exists and failed while planning, the
    /// call re-enters planning with the new topic and config instead. Any
    /// other existing run is rejected.
    pub async fn start_with_id(
        &self,
        run_id: RunId,
        topic: &str,
        config: ResearchConfig,
    ) -> Result<RunPhase> {
        config.validate()?;
        let providers = self.registry.resolve(&config)?;
        for warning in config.warnings() {
            warn!(run_id = %run_id, "{warning}");
        }

        let handle = self.handle(run_id);
        let _guard = handle.lock.lock().await;

        let mut state = match self.store.load(run_id).await? {
            Some(mut existing) if planning_failed(&existing) => {
                info!(run_id = %run_id, topic, "Retrying plan generation for failed run");
                existing.transition(RunPhase::Planning)?;
                existing.topic = topic.to_string();
                existing.config = config;
                existing.diagnostic = None;
                existing
            }
            Some(_) => {
                return Err(WorkflowError::RunAlreadyExists {
                    run_id: run_id.to_string(),
                }
                .into());
            }
            None => {
                info!(run_id = %run_id, topic, "Starting run");
                RunState::new(run_id, topic, config)
            }
        };
        self.checkpoint(&mut state, &handle.cancel).await?;
        self.drive(&mut state, &providers, &handle.cancel).await
    }

    /// The plan awaiting review, if the run is suspended on it.
    pub async fn pending_interrupt(&self, run_id: RunId) -> Result<Option<Plan>> {
        Ok(self.interrupt(run_id).await?.map(|i| i.plan))
    }

    /// Full interrupt payload (plan, revision, review message).
    pub async fn interrupt(&self, run_id: RunId) -> Result<Option<Interrupt>> {
        Ok(self.load_state(run_id).await?.interrupt)
    }

    /// Apply caller feedback to a suspended run and drive it onward.
    ///
    /// Runs without a pending interrupt reject the signal and are left exactly
    /// as they were; nothing is written.
    pub async fn resume(&self, run_id: RunId, signal: FeedbackSignal) -> Result<RunPhase> {
        let handle = self.existing_handle(run_id).await?;
        let _guard = handle.lock.lock().await;
        let mut state = self.load_state(run_id).await?;

        match (&signal, state.phase) {
            (FeedbackSignal::Approve, RunPhase::AwaitingFeedback) if state.interrupt.is_some() => {
                info!(run_id = %run_id, revision = state.plan_generations, "Plan approved");
                state.approve()?;
            }
            (FeedbackSignal::Revise(feedback), RunPhase::AwaitingFeedback)
                if state.interrupt.is_some() && !feedback.trim().is_empty() =>
            {
                info!(run_id = %run_id, revision = state.plan_generations, "Plan revision requested");
                state.revise(feedback.trim().to_string())?;
            }
            (FeedbackSignal::Revise(feedback), RunPhase::Error)
                if planning_failed(&state) && !feedback.trim().is_empty() =>
            {
                info!(run_id = %run_id, "Re-planning failed run with feedback");
                state.revise(feedback.trim().to_string())?;
            }
            _ if state.interrupt.is_some() || planning_failed(&state) => {
                return Err(InvalidResumeError::IncompatibleSignal {
                    run_id: run_id.to_string(),
                    phase: state.phase.to_string(),
                    signal: signal.to_string(),
                }
                .into());
            }
            _ => {
                return Err(InvalidResumeError::NoPendingInterrupt {
                    run_id: run_id.to_string(),
                    phase: state.phase.to_string(),
                }
                .into());
            }
        }

        let providers = self.registry.resolve(&state.config)?;
        self.checkpoint(&mut state, &handle.cancel).await?;
        self.drive(&mut state, &providers, &handle.cancel).await
    }

    /// Continue a run from its latest checkpoint.
    ///
    /// Drives internally-advancing phases (after a restart) and re-enters the
    /// failed stage of a recoverable run in error.
    pub async fn continue_run(&self, run_id: RunId) -> Result<RunPhase> {
        let handle = self.existing_handle(run_id).await?;
        let _guard = handle.lock.lock().await;
        let mut state = self.load_state(run_id).await?;

        if state.phase == RunPhase::Error {
            let stage = state
                .diagnostic
                .as_ref()
                .filter(|d| d.recoverable)
                .map(|d| d.stage)
                .ok_or_else(|| WorkflowError::NotContinuable {
                    run_id: run_id.to_string(),
                    phase: state.phase.to_string(),
                })?;
            info!(run_id = %run_id, stage = %stage, "Retrying failed stage");
            state.transition(stage)?;
            state.diagnostic = None;
        } else if !state.phase.is_internally_driven() {
            return Err(WorkflowError::NotContinuable {
                run_id: run_id.to_string(),
                phase: state.phase.to_string(),
            }
            .into());
        }

        let providers = self.registry.resolve(&state.config)?;
        self.checkpoint(&mut state, &handle.cancel).await?;
        self.drive(&mut state, &providers, &handle.cancel).await
    }

    /// The compiled report, once the run is done.
    pub async fn result(&self, run_id: RunId) -> Result<Option<Document>> {
        let state = self.load_state(run_id).await?;
        Ok(match state.phase {
            RunPhase::Done => state.final_report,
            _ => None,
        })
    }

    pub async fn phase(&self, run_id: RunId) -> Result<RunPhase> {
        Ok(self.load_state(run_id).await?.phase)
    }

    pub async fn status(&self, run_id: RunId) -> Result<RunStatus> {
        Ok(self.load_state(run_id).await?.status())
    }

    /// Full persisted state of a run.
    pub async fn state(&self, run_id: RunId) -> Result<RunState> {
        self.load_state(run_id).await
    }

    /// Cancel a run. In-flight provider calls finish but their results are
    /// discarded. Finished or already-cancelled runs are left as they are.
    pub async fn cancel(&self, run_id: RunId) -> Result<RunPhase> {
        let current = self.load_state(run_id).await?.phase;
        if current.is_terminal() {
            return Ok(current);
        }
        let handle = self.handle(run_id);
        handle.cancel.cancel();
        let _guard = handle.lock.lock().await;

        let mut state = self.load_state(run_id).await?;
        if state.phase.is_terminal() {
            return Ok(state.phase);
        }
        state.transition(RunPhase::Cancelled)?;
        state.interrupt = None;
        state.checkpoint_seq += 1;
        self.store.save(&state).await?;
        info!(run_id = %run_id, "Run cancelled");
        Ok(state.phase)
    }

    /// Cancel a run if active and delete its checkpoint.
    pub async fn discard(&self, run_id: RunId) -> Result<bool> {
        let handle = self.handle(run_id);
        handle.cancel.cancel();
        let removed = {
            let _guard = handle.lock.lock().await;
            self.store.delete(run_id).await?
        };
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id);
        info!(run_id = %run_id, removed, "Run discarded");
        Ok(removed)
    }

    /// Ids of every stored run.
    pub async fn list_runs(&self) -> Result<Vec<RunId>> {
        Ok(self.store.list().await?)
    }

    fn handle(&self, run_id: RunId) -> Arc<RunHandle> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(run_id)
            .or_insert_with(|| Arc::new(RunHandle::new()))
            .clone()
    }

    /// Handle for a run that is already stored. Unknown ids get no entry.
    async fn existing_handle(&self, run_id: RunId) -> Result<Arc<RunHandle>> {
        if self.store.load_raw(run_id).await?.is_none() {
            return Err(not_found(run_id));
        }
        Ok(self.handle(run_id))
    }

    async fn load_state(&self, run_id: RunId) -> Result<RunState> {
        self.store.load(run_id).await?.ok_or_else(|| not_found(run_id))
    }

    /// Persist `state` as the next checkpoint unless the run was cancelled.
    async fn checkpoint(&self, state: &mut RunState, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(cancelled(state.id));
        }
        state.checkpoint_seq += 1;
        self.store.save(state).await?;
        debug!(run_id = %state.id, seq = state.checkpoint_seq, phase = %state.phase, "Checkpoint saved");
        Ok(())
    }

    /// Advance the run until it suspends, finishes, or fails.
    ///
    /// Stage failures move the run to the error phase and are reported through
    /// its diagnostic; only storage failures and cancellation surface as `Err`.
    async fn drive(
        &self,
        state: &mut RunState,
        providers: &StageProviders,
        cancel: &CancellationToken,
    ) -> Result<RunPhase> {
        loop {
            let outcome = match state.phase {
                RunPhase::Planning => self.plan_stage(state, providers, cancel).await,
                RunPhase::Approved => self.enter(state, RunPhase::Researching, cancel).await,
                RunPhase::Researching => self.research_stage(state, providers, cancel).await,
                RunPhase::Compiling => self.compile_stage(state, providers, cancel).await,
                RunPhase::AwaitingFeedback
                | RunPhase::Done
                | RunPhase::Error
                | RunPhase::Cancelled => return Ok(state.phase),
            };

            match outcome {
                Ok(()) => {}
                Err(err) if cancel.is_cancelled() || is_fatal(&err) => return Err(err),
                Err(err) => {
                    warn!(run_id = %state.id, phase = %state.phase, error = %err, "Run failed");
                    state.fail(&err);
                    self.checkpoint(state, cancel).await?;
                    return Ok(state.phase);
                }
            }
        }
    }

    async fn enter(&self, state: &mut RunState, next: RunPhase, cancel: &CancellationToken) -> Result<()> {
        state.transition(next)?;
        info!(run_id = %state.id, phase = %next, "Phase entered");
        self.checkpoint(state, cancel).await
    }

    async fn plan_stage(
        &self,
        state: &mut RunState,
        providers: &StageProviders,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let planner = Planner::new(providers.clone(), state.config.clone());
        let plan = planner
            .generate_plan(
                &state.topic,
                Some(state.config.report_structure()),
                state.pending_feedback.as_deref(),
                state.plan.as_ref(),
            )
            .await?;
        if cancel.is_cancelled() {
            return Err(cancelled(state.id));
        }
        state.record_plan(plan)?;
        info!(
            run_id = %state.id,
            revision = state.plan_generations,
            sections = state.plan.as_ref().map_or(0, Plan::len),
            "Awaiting plan review"
        );
        self.checkpoint(state, cancel).await
    }

    /// Fan out one research loop per unfinished research section and apply
    /// their snapshots until every loop has returned.
    async fn research_stage(
        &self,
        state: &mut RunState,
        providers: &StageProviders,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let research = Arc::new(ResearchLoop::new(
            state.topic.clone(),
            providers.clone(),
            state.config.clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(state.config.max_concurrent_sections));
        let sections = cancel.child_token();
        let (tx, mut rx) = mpsc::channel::<Section>(PROGRESS_BUFFER);
        let mut tasks = JoinSet::new();

        let pending: Vec<Section> = state
            .sections
            .iter()
            .filter(|s| s.requires_research && !s.is_terminal())
            .cloned()
            .collect();
        info!(run_id = %state.id, sections = pending.len(), "Researching sections");

        for section in pending {
            let research = Arc::clone(&research);
            let semaphore = Arc::clone(&semaphore);
            let progress = tx.clone();
            let token = sections.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return Err(ScrivenerError::from(WorkflowError::TaskFailed {
                            message: e.to_string(),
                        }));
                    }
                };
                if token.is_cancelled() {
                    return Ok(section);
                }
                research
                    .run(section, progress, token)
                    .await
                    .map_err(ScrivenerError::from)
            });
        }
        drop(tx);

        let mut failure: Option<ScrivenerError> = None;
        let mut channel_open = true;
        while channel_open || !tasks.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.detach_all();
                    return Err(cancelled(state.id));
                }
                snapshot = rx.recv(), if channel_open => match snapshot {
                    Some(section) => {
                        debug!(
                            run_id = %state.id,
                            section = %section.name,
                            status = %section.status,
                            iteration = section.iteration,
                            "Section progress"
                        );
                        state.apply_section(section);
                        self.checkpoint(state, cancel).await?;
                    }
                    None => channel_open = false,
                },
                joined = tasks.join_next(), if !tasks.is_empty() => {
                    let err = match joined {
                        Some(Ok(Ok(_))) | None => continue,
                        Some(Ok(Err(err))) => err,
                        Some(Err(join_err)) => WorkflowError::TaskFailed {
                            message: join_err.to_string(),
                        }
                        .into(),
                    };
                    warn!(run_id = %state.id, error = %err, "Research task failed");
                    sections.cancel();
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if !state.research_barrier_reached() {
            return Err(WorkflowError::TaskFailed {
                message: "research ended with unfinished sections".to_string(),
            }
            .into());
        }
        self.enter(state, RunPhase::Compiling, cancel).await
    }

    async fn compile_stage(
        &self,
        state: &mut RunState,
        providers: &StageProviders,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let assembler = ReportAssembler::new(providers.clone(), state.config.retry.clone());
        ensure_researched(&state.sections)?;
        let topic = state.topic.clone();
        let researched = render_researched(&state.sections);

        // Each structural draft is checkpointed as it lands, so a retry only
        // writes the sections still missing.
        let mut writes: FuturesUnordered<_> = pending_structural(&state.sections)
            .into_iter()
            .map(|i| {
                let section = state.sections[i].clone();
                let (assembler, topic, researched) = (&assembler, &topic, &researched);
                async move {
                    let text = assembler.write_structural(topic, &section, researched).await;
                    (section.ordinal, text)
                }
            })
            .collect();
        while let Some((ordinal, text)) = writes.next().await {
            let text = text?;
            if let Some(section) = state.sections.iter_mut().find(|s| s.ordinal == ordinal) {
                section.finish_structural(text).map_err(CompileError::from)?;
            }
            self.checkpoint(state, cancel).await?;
        }
        drop(writes);

        let document = assembler.finish(&topic, &state.sections);
        if cancel.is_cancelled() {
            return Err(cancelled(state.id));
        }
        state.final_report = Some(document);
        state.transition(RunPhase::Done)?;
        info!(run_id = %state.id, "Run finished");
        self.checkpoint(state, cancel).await
    }
}

fn not_found(run_id: RunId) -> ScrivenerError {
    WorkflowError::RunNotFound {
        run_id: run_id.to_string(),
    }
    .into()
}

fn cancelled(run_id: RunId) -> ScrivenerError {
    WorkflowError::Cancelled {
        run_id: run_id.to_string(),
    }
    .into()
}

/// Errors that abort the driver without recording a run failure.
fn is_fatal(err: &ScrivenerError) -> bool {
    matches!(
        err,
        ScrivenerError::Checkpoint(_) | ScrivenerError::Io(_) | ScrivenerError::Config(_)
    )
}

fn planning_failed(state: &RunState) -> bool {
    state.phase == RunPhase::Error
        && state
            .diagnostic
            .as_ref()
            .is_some_and(|d| d.stage == RunPhase::Planning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::config::RetryConfig;
    use crate::error::ProviderError;
    use crate::search::MockSearchProvider;
    use crate::types::{CompletionPurpose, ModelSelector};

    const PLAN_JSON: &str = r#"{"sections": [
        {"name": "Introduction", "description": "Overview", "research": false},
        {"name": "Scheduler", "description": "Work stealing", "research": true},
        {"name": "Conclusion", "description": "Summary", "research": false}
    ]}"#;

    fn scripted_llm() -> Arc<MockLlmProvider> {
        Arc::new(MockLlmProvider::with_handler(|req| {
            Ok(match req.purpose {
                CompletionPurpose::Plan => PLAN_JSON.into(),
                CompletionPurpose::SectionQueries => r#"{"queries": ["tokio scheduler"]}"#.into(),
                CompletionPurpose::SectionWrite => "The scheduler steals work.".into(),
                CompletionPurpose::SectionGrade => r#"{"grade": "pass"}"#.into(),
                CompletionPurpose::StructuralWrite => "Framing text.".into(),
                _ => r#"{"queries": []}"#.into(),
            })
        }))
    }

    fn config() -> ResearchConfig {
        ResearchConfig {
            planner: ModelSelector::new("mock", "planner"),
            writer: ModelSelector::new("mock", "writer"),
            search_api: "mock".into(),
            planner_context_search: false,
            max_search_depth: 1,
            retry: RetryConfig {
                max_retries: 0,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
                backoff_multiplier: 1.0,
                jitter: false,
            },
            ..Default::default()
        }
    }

    fn orchestrator(llm: Arc<MockLlmProvider>) -> Orchestrator {
        let registry = ProviderRegistry::new()
            .with_completion("mock", llm)
            .with_search("mock", Arc::new(MockSearchProvider::echo()));
        Orchestrator::in_memory(registry)
    }

    #[tokio::test]
    async fn test_start_suspends_on_review() {
        let orch = orchestrator(scripted_llm());
        let run_id = orch.start("Tokio", config()).await.unwrap();

        assert_eq!(orch.phase(run_id).await.unwrap(), RunPhase::AwaitingFeedback);
        let plan = orch.pending_interrupt(run_id).await.unwrap().unwrap();
        assert_eq!(plan.len(), 3);
        assert!(orch.result(run_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_approve_runs_to_done() {
        let orch = orchestrator(scripted_llm());
        let run_id = orch.start("Tokio", config()).await.unwrap();
        let phase = orch.resume(run_id, FeedbackSignal::Approve).await.unwrap();
        assert_eq!(phase, RunPhase::Done);

        let doc = orch.result(run_id).await.unwrap().unwrap();
        assert!(doc.body.contains("## Scheduler\n\nThe scheduler steals work."));
        assert!(orch.pending_interrupt(run_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_without_interrupt_rejected() {
        let orch = orchestrator(scripted_llm());
        let run_id = orch.start("Tokio", config()).await.unwrap();
        orch.resume(run_id, FeedbackSignal::Approve).await.unwrap();

        let err = orch.resume(run_id, FeedbackSignal::Approve).await.unwrap_err();
        assert!(matches!(
            err,
            ScrivenerError::InvalidResume(InvalidResumeError::NoPendingInterrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_revision_rejected() {
        let orch = orchestrator(scripted_llm());
        let run_id = orch.start("Tokio", config()).await.unwrap();
        let err = orch
            .resume(run_id, FeedbackSignal::Revise("   ".into()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScrivenerError::InvalidResume(InvalidResumeError::IncompatibleSignal { .. })
        ));
        assert_eq!(orch.phase(run_id).await.unwrap(), RunPhase::AwaitingFeedback);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let orch = orchestrator(scripted_llm());
        let err = orch.phase(RunId::new()).await.unwrap_err();
        assert!(matches!(err, ScrivenerError::Workflow(WorkflowError::RunNotFound { .. })));
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected_before_run_exists() {
        let orch = orchestrator(scripted_llm());
        let config = ResearchConfig {
            search_api: "bing".into(),
            ..config()
        };
        let err = orch.start("Tokio", config).await.unwrap_err();
        assert!(matches!(err, ScrivenerError::Config(_)));
        assert!(orch.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_with_existing_id_rejected() {
        let orch = orchestrator(scripted_llm());
        let run_id = orch.start("Tokio", config()).await.unwrap();
        let err = orch.start_with_id(run_id, "Tokio", config()).await.unwrap_err();
        assert!(matches!(err, ScrivenerError::Workflow(WorkflowError::RunAlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let orch = orchestrator(scripted_llm());
        let run_id = orch.start("Tokio", config()).await.unwrap();
        assert_eq!(orch.cancel(run_id).await.unwrap(), RunPhase::Cancelled);

        let err = orch.resume(run_id, FeedbackSignal::Approve).await.unwrap_err();
        assert!(matches!(
            err,
            ScrivenerError::InvalidResume(InvalidResumeError::NoPendingInterrupt { .. })
        ));
        assert!(orch.continue_run(run_id).await.is_err());
        assert_eq!(orch.phase(run_id).await.unwrap(), RunPhase::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_id_registers_no_handle() {
        let orch = orchestrator(scripted_llm());
        let run_id = RunId::new();
        assert!(orch.cancel(run_id).await.is_err());
        assert!(orch.resume(run_id, FeedbackSignal::Approve).await.is_err());
        assert!(orch.continue_run(run_id).await.is_err());
        assert!(orch.handles.lock().unwrap().is_empty());

        assert_eq!(
            orch.start_with_id(run_id, "Tokio", config()).await.unwrap(),
            RunPhase::AwaitingFeedback
        );
    }

    #[tokio::test]
    async fn test_discard_removes_run() {
        let orch = orchestrator(scripted_llm());
        let run_id = orch.start("Tokio", config()).await.unwrap();
        assert_eq!(orch.list_runs().await.unwrap(), vec![run_id]);
        assert!(orch.discard(run_id).await.unwrap());
        assert!(orch.list_runs().await.unwrap().is_empty());
        assert!(!orch.discard(run_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_research_failure_records_diagnostic() {
        let llm = Arc::new(MockLlmProvider::with_handler(|req| match req.purpose {
            CompletionPurpose::Plan => Ok(PLAN_JSON.into()),
            CompletionPurpose::SectionQueries => Err(ProviderError::AuthFailed {
                provider: "mock".into(),
            }),
            _ => Ok("unused".into()),
        }));
        let orch = orchestrator(llm);
        let run_id = orch.start("Tokio", config()).await.unwrap();
        let phase = orch.resume(run_id, FeedbackSignal::Approve).await.unwrap();
        assert_eq!(phase, RunPhase::Error);

        let status = orch.status(run_id).await.unwrap();
        let diag = status.diagnostic.unwrap();
        assert_eq!(diag.stage, RunPhase::Researching);
        assert!(diag.message.contains("Scheduler"));
        assert!(orch.result(run_id).await.unwrap().is_none());
    }
}
