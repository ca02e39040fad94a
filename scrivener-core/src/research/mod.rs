//! Research stages: planning, per-section research, and report assembly.
//!
//! 1. **Plan**: turn a topic (plus optional feedback) into ordered section stubs
//! 2. **Research**: per section, formulate queries, search, write, and grade until
//!    the draft is sufficient or the depth bound is reached
//! 3. **Assemble**: write non-research sections from the researched ones and join
//!    everything in plan order
//!
//! Every stage talks to models and search backends only through the capability
//! traits resolved in [`crate::providers::StageProviders`].

pub mod assembler;
pub mod plan;
pub mod prompts;
pub mod research_loop;
pub mod section;
pub mod sources;
pub mod structured;

pub use assembler::{Document, DocumentSection, ReportAssembler, SourceRef};
pub use plan::{Plan, PlannedSection, Planner};
pub use research_loop::ResearchLoop;
pub use section::{ResearchStep, Section, SectionOutcome, SectionStatus, Source};
