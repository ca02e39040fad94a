//! Run state: the single serializable record a checkpoint captures.

use crate::config::ResearchConfig;
use crate::error::{CompileError, ScrivenerError, WorkflowError};
use crate::research::{Document, Plan, Section, SectionOutcome, SectionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Top-level lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    /// Suspended on the plan-review interrupt.
    AwaitingFeedback,
    Approved,
    Researching,
    Compiling,
    Done,
    Error,
    Cancelled,
}

impl RunPhase {
    /// Phases reachable from this one.
    pub fn allowed_transitions(&self) -> &'static [RunPhase] {
        use RunPhase::*;
        match self {
            Planning => &[AwaitingFeedback, Error, Cancelled],
            AwaitingFeedback => &[Planning, Approved, Cancelled],
            Approved => &[Researching, Error, Cancelled],
            Researching => &[Compiling, Error, Cancelled],
            Compiling => &[Done, Error, Cancelled],
            // Recovery re-enters the phase that failed.
            Error => &[Planning, Approved, Researching, Compiling, Cancelled],
            Done | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// No further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Cancelled)
    }

    /// Phases the orchestrator advances on its own, without caller input.
    pub fn is_internally_driven(&self) -> bool {
        matches!(
            self,
            RunPhase::Planning | RunPhase::Approved | RunPhase::Researching | RunPhase::Compiling
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Planning => write!(f, "planning"),
            RunPhase::AwaitingFeedback => write!(f, "awaiting_feedback"),
            RunPhase::Approved => write!(f, "approved"),
            RunPhase::Researching => write!(f, "researching"),
            RunPhase::Compiling => write!(f, "compiling"),
            RunPhase::Done => write!(f, "done"),
            RunPhase::Error => write!(f, "error"),
            RunPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Caller input that resumes a run suspended on plan review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "feedback", rename_all = "snake_case")]
pub enum FeedbackSignal {
    /// Accept the current plan and start research.
    Approve,
    /// Regenerate the plan with this guidance.
    Revise(String),
}

impl fmt::Display for FeedbackSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackSignal::Approve => write!(f, "approve"),
            FeedbackSignal::Revise(_) => write!(f, "revise"),
        }
    }
}

/// The plan-review payload handed to the caller at the suspend point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub plan: Plan,
    /// 1 for the first plan, incremented on every regeneration.
    pub revision: u32,
    /// Human-readable review prompt including the rendered plan.
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Interrupt {
    pub fn new(plan: Plan, revision: u32) -> Self {
        let message = format!(
            "Please review the report plan (revision {revision}):\n\n{}\n\
             Approve the plan, or reply with feedback to regenerate it.",
            plan.render()
        );
        Self {
            plan,
            revision,
            message,
            raised_at: Utc::now(),
        }
    }
}

/// Category of a run failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PlanGeneration,
    Provider,
    MalformedResponse,
    IncompleteSections,
    Internal,
}

/// Why a run is in the error phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostic {
    pub kind: FailureKind,
    /// Phase that was running when the failure happened.
    pub stage: RunPhase,
    pub message: String,
    /// Whether `continue_run` may re-enter `stage`.
    pub recoverable: bool,
    /// Whether the cause was a transient provider failure.
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

impl RunDiagnostic {
    pub fn from_error(stage: RunPhase, error: &ScrivenerError) -> Self {
        let kind = match error {
            ScrivenerError::PlanGeneration(_) => FailureKind::PlanGeneration,
            ScrivenerError::Provider(_) => FailureKind::Provider,
            ScrivenerError::Research(crate::error::ResearchError::Provider { .. }) => {
                FailureKind::Provider
            }
            ScrivenerError::Research(_) => FailureKind::MalformedResponse,
            ScrivenerError::Compile(CompileError::IncompleteSections { .. }) => {
                FailureKind::IncompleteSections
            }
            ScrivenerError::Compile(CompileError::Provider(_)) => FailureKind::Provider,
            ScrivenerError::Compile(CompileError::EmptySection { .. }) => {
                FailureKind::MalformedResponse
            }
            _ => FailureKind::Internal,
        };
        Self {
            kind,
            stage,
            message: error.to_string(),
            recoverable: kind != FailureKind::IncompleteSections,
            retryable: error.is_retryable(),
            at: Utc::now(),
        }
    }
}

/// One entry in the run's phase history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: RunPhase,
    pub at: DateTime<Utc>,
}

/// Complete persisted state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: RunId,
    pub topic: String,
    pub config: ResearchConfig,
    pub phase: RunPhase,
    pub plan: Option<Plan>,
    /// Section arena indexed by ordinal. Built when the plan is approved.
    #[serde(default)]
    pub sections: Vec<Section>,
    pub interrupt: Option<Interrupt>,
    /// Revision guidance awaiting the next plan generation.
    pub pending_feedback: Option<String>,
    #[serde(default)]
    pub feedback_history: Vec<String>,
    pub final_report: Option<Document>,
    pub diagnostic: Option<RunDiagnostic>,
    pub plan_generations: u32,
    pub interrupts_emitted: u32,
    #[serde(default)]
    pub phase_history: Vec<PhaseTransition>,
    /// Sequence number of the latest persisted checkpoint.
    pub checkpoint_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Create a run in the planning phase.
    pub fn new(id: RunId, topic: impl Into<String>, config: ResearchConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            topic: topic.into(),
            config,
            phase: RunPhase::Planning,
            plan: None,
            sections: Vec::new(),
            interrupt: None,
            pending_feedback: None,
            feedback_history: Vec::new(),
            final_report: None,
            diagnostic: None,
            plan_generations: 0,
            interrupts_emitted: 0,
            phase_history: vec![PhaseTransition {
                phase: RunPhase::Planning,
                at: now,
            }],
            checkpoint_seq: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting transitions outside the phase graph.
    pub fn transition(&mut self, next: RunPhase) -> Result<(), WorkflowError> {
        if !self.phase.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        self.phase = next;
        self.updated_at = now;
        self.phase_history.push(PhaseTransition { phase: next, at: now });
        Ok(())
    }

    /// Record a new plan and suspend on review.
    pub fn record_plan(&mut self, plan: Plan) -> Result<(), WorkflowError> {
        self.plan_generations += 1;
        self.interrupts_emitted += 1;
        self.interrupt = Some(Interrupt::new(plan.clone(), self.plan_generations));
        self.plan = Some(plan);
        if let Some(feedback) = self.pending_feedback.take() {
            self.feedback_history.push(feedback);
        }
        self.diagnostic = None;
        self.transition(RunPhase::AwaitingFeedback)
    }

    /// Accept the current plan and build the section arena from it.
    pub fn approve(&mut self) -> Result<(), WorkflowError> {
        self.transition(RunPhase::Approved)?;
        self.interrupt = None;
        self.sections = self
            .plan
            .as_ref()
            .map(|p| p.sections.iter().map(Section::from_planned).collect())
            .unwrap_or_default();
        Ok(())
    }

    /// Drop the pending interrupt and go back to planning with feedback bound.
    pub fn revise(&mut self, feedback: String) -> Result<(), WorkflowError> {
        self.transition(RunPhase::Planning)?;
        self.interrupt = None;
        self.pending_feedback = Some(feedback);
        Ok(())
    }

    /// Move to the error phase with a diagnostic. No-op on terminal runs.
    pub fn fail(&mut self, error: &ScrivenerError) {
        if self.phase.is_terminal() || self.phase == RunPhase::Error {
            return;
        }
        self.diagnostic = Some(RunDiagnostic::from_error(self.phase, error));
        // Every non-terminal phase may move to Error except AwaitingFeedback,
        // which never fails on its own.
        if self.transition(RunPhase::Error).is_err() {
            self.phase = RunPhase::Error;
            self.phase_history.push(PhaseTransition {
                phase: RunPhase::Error,
                at: self.updated_at,
            });
        }
    }

    /// Replace a section with a newer snapshot from its research loop.
    pub fn apply_section(&mut self, snapshot: Section) {
        if let Some(slot) = self.sections.get_mut(snapshot.ordinal) {
            *slot = snapshot;
            self.updated_at = Utc::now();
        }
    }

    /// Whether every research section has reached complete or failed.
    pub fn research_barrier_reached(&self) -> bool {
        self.sections
            .iter()
            .filter(|s| s.requires_research)
            .all(|s| s.status.is_terminal())
    }

    /// Summary for callers polling the run.
    pub fn status(&self) -> RunStatus {
        RunStatus {
            run_id: self.id,
            topic: self.topic.clone(),
            phase: self.phase,
            diagnostic: self.diagnostic.clone(),
            plan_generations: self.plan_generations,
            interrupts_emitted: self.interrupts_emitted,
            sections: self
                .sections
                .iter()
                .map(|s| SectionSummary {
                    ordinal: s.ordinal,
                    name: s.name.clone(),
                    researched: s.requires_research,
                    status: s.status,
                    outcome: s.outcome,
                    iteration: s.iteration,
                    sources: s.sources.len(),
                })
                .collect(),
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub topic: String,
    pub phase: RunPhase,
    pub diagnostic: Option<RunDiagnostic>,
    pub plan_generations: u32,
    pub interrupts_emitted: u32,
    pub sections: Vec<SectionSummary>,
    pub updated_at: DateTime<Utc>,
}

/// Progress of one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub ordinal: usize,
    pub name: String,
    pub researched: bool,
    pub status: SectionStatus,
    pub outcome: Option<SectionOutcome>,
    pub iteration: u32,
    pub sources: usize,
}
