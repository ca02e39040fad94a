//! Run lifecycle: state, checkpoints, and the orchestrating state machine.
//!
//! A run moves `planning → awaiting_feedback → (planning | approved) →
//! researching → compiling → done`, with `error` and `cancelled` as side
//! exits. The only suspend point is plan review; everything else is driven
//! by the [`Orchestrator`] and checkpointed as it goes.

pub mod checkpoint;
pub mod orchestrator;
pub mod run;

pub use checkpoint::{
    CHECKPOINT_FORMAT_VERSION, Checkpoint, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore,
};
pub use orchestrator::Orchestrator;
pub use run::{
    FailureKind, FeedbackSignal, Interrupt, PhaseTransition, RunDiagnostic, RunId, RunPhase,
    RunState, RunStatus, SectionSummary,
};
