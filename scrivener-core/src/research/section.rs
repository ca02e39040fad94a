//! Report sections and their research lifecycle.
//!
//! A [`Section`] is created from a [`PlannedSection`] when a plan is approved.
//! Research sections move `pending -> researching -> complete | failed`; the
//! [`ResearchStep`] cursor records which step runs next so an interrupted loop
//! resumes without repeating completed provider calls.

use super::plan::PlannedSection;
use crate::error::ResearchError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Lifecycle status of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Pending,
    Researching,
    Complete,
    Failed,
}

impl SectionStatus {
    /// Statuses reachable from this one.
    pub fn allowed_transitions(&self) -> &'static [SectionStatus] {
        match self {
            SectionStatus::Pending => &[SectionStatus::Researching],
            SectionStatus::Researching => &[
                SectionStatus::Researching,
                SectionStatus::Complete,
                SectionStatus::Failed,
            ],
            SectionStatus::Complete | SectionStatus::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: SectionStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SectionStatus::Complete | SectionStatus::Failed)
    }
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionStatus::Pending => write!(f, "pending"),
            SectionStatus::Researching => write!(f, "researching"),
            SectionStatus::Complete => write!(f, "complete"),
            SectionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The next step a section's research loop will execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStep {
    /// Ask the writer model for search queries.
    Formulate,
    /// Run `pending_queries` through the search backend.
    Search,
    /// Synthesize the draft from gathered sources.
    Write,
    /// Grade the draft for sufficiency.
    Grade,
    /// Nothing left to do.
    Finished,
}

/// Why a research section stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOutcome {
    /// The grader judged the draft sufficient.
    Sufficient,
    /// The depth bound was reached without a passing grade.
    DepthExhausted,
}

/// A gathered source with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Source body after truncation, when the backend returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub truncated: bool,
    /// Query that surfaced this source.
    pub query: String,
    /// Research iteration (1-based) in which it was gathered.
    pub iteration: u32,
}

/// One section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub ordinal: usize,
    pub name: String,
    /// One-line research intent from the plan.
    pub description: String,
    pub requires_research: bool,
    pub status: SectionStatus,
    pub step: ResearchStep,
    /// Completed search rounds.
    pub iteration: u32,
    /// Queries awaiting the next search step.
    #[serde(default)]
    pub pending_queries: Vec<String>,
    /// Every query already searched, in order.
    #[serde(default)]
    pub executed_queries: Vec<String>,
    /// Append-only gathered material.
    #[serde(default)]
    pub sources: Vec<Source>,
    pub draft: Option<String>,
    pub outcome: Option<SectionOutcome>,
    /// Follow-up queries proposed by the most recent failing grade.
    #[serde(default)]
    pub follow_up_queries: Vec<String>,
}

impl Section {
    /// Create a pending section from its plan stub.
    pub fn from_planned(planned: &PlannedSection) -> Self {
        Self {
            ordinal: planned.ordinal,
            name: planned.name.clone(),
            description: planned.description.clone(),
            requires_research: planned.research,
            status: SectionStatus::Pending,
            step: ResearchStep::Formulate,
            iteration: 0,
            pending_queries: Vec::new(),
            executed_queries: Vec::new(),
            sources: Vec::new(),
            draft: None,
            outcome: None,
            follow_up_queries: Vec::new(),
        }
    }

    /// Move to `next`, rejecting transitions outside the allowed graph.
    pub fn transition(&mut self, next: SectionStatus) -> Result<(), ResearchError> {
        if !self.status.can_transition_to(next) {
            return Err(ResearchError::IllegalTransition {
                section: self.name.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.step = ResearchStep::Finished;
            self.pending_queries.clear();
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the section has any written text.
    pub fn has_content(&self) -> bool {
        self.draft.as_deref().is_some_and(|d| !d.trim().is_empty())
    }

    /// Store the written text of a structural section and mark it complete.
    ///
    /// Structural sections have no research loop, so they pass through
    /// `researching` while their text is written.
    pub fn finish_structural(&mut self, text: String) -> Result<(), ResearchError> {
        if self.status == SectionStatus::Pending {
            self.transition(SectionStatus::Researching)?;
        }
        self.transition(SectionStatus::Complete)?;
        self.draft = Some(text);
        Ok(())
    }

    /// URLs already gathered by this section.
    pub fn source_urls(&self) -> HashSet<&str> {
        self.sources.iter().map(|s| s.url.as_str()).collect()
    }

    /// Append sources whose URL is not yet known. Returns how many were added.
    pub fn append_sources(&mut self, candidates: Vec<Source>) -> usize {
        let mut seen: HashSet<String> = self.source_urls().into_iter().map(str::to_owned).collect();
        let before = self.sources.len();
        for source in candidates {
            if seen.insert(source.url.clone()) {
                self.sources.push(source);
            }
        }
        self.sources.len() - before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(name: &str, research: bool) -> PlannedSection {
        PlannedSection {
            ordinal: 1,
            name: name.into(),
            description: format!("About {name}"),
            research,
        }
    }

    fn source(url: &str, iteration: u32) -> Source {
        Source {
            title: url.into(),
            url: url.into(),
            snippet: String::new(),
            content: None,
            truncated: false,
            query: "q".into(),
            iteration,
        }
    }

    #[test]
    fn test_from_planned() {
        let section = Section::from_planned(&planned("Benchmarks", true));
        assert_eq!(section.ordinal, 1);
        assert_eq!(section.status, SectionStatus::Pending);
        assert_eq!(section.step, ResearchStep::Formulate);
        assert!(section.requires_research);
        assert!(!section.has_content());
    }

    #[test]
    fn test_allowed_transitions() {
        let mut section = Section::from_planned(&planned("A", true));
        section.transition(SectionStatus::Researching).unwrap();
        section.transition(SectionStatus::Researching).unwrap();
        section.transition(SectionStatus::Complete).unwrap();
        assert!(section.is_terminal());
        assert_eq!(section.step, ResearchStep::Finished);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut section = Section::from_planned(&planned("A", true));
        let err = section.transition(SectionStatus::Complete).unwrap_err();
        assert_eq!(
            err.to_string(),
            "section 'A': illegal status transition from pending to complete"
        );

        section.transition(SectionStatus::Researching).unwrap();
        section.transition(SectionStatus::Failed).unwrap();
        assert!(section.transition(SectionStatus::Researching).is_err());
        assert_eq!(section.status, SectionStatus::Failed);
    }

    #[test]
    fn test_append_sources_dedupes_by_url() {
        let mut section = Section::from_planned(&planned("A", true));
        let added = section.append_sources(vec![source("https://a", 1), source("https://b", 1)]);
        assert_eq!(added, 2);

        let added = section.append_sources(vec![
            source("https://b", 2),
            source("https://c", 2),
            source("https://c", 2),
        ]);
        assert_eq!(added, 1);
        assert_eq!(section.sources.len(), 3);
        // Provenance of the first sighting is kept.
        assert_eq!(section.sources[1].iteration, 1);
    }

    #[test]
    fn test_finish_structural_follows_graph() {
        let mut section = Section::from_planned(&planned("Introduction", false));
        section.finish_structural("Opening text.".into()).unwrap();
        assert_eq!(section.status, SectionStatus::Complete);
        assert_eq!(section.step, ResearchStep::Finished);
        assert_eq!(section.draft.as_deref(), Some("Opening text."));

        let err = section.finish_structural("Again.".into()).unwrap_err();
        assert!(matches!(err, ResearchError::IllegalTransition { .. }));
        assert_eq!(section.draft.as_deref(), Some("Opening text."));
    }

    #[test]
    fn test_has_content_ignores_whitespace() {
        let mut section = Section::from_planned(&planned("A", false));
        section.draft = Some("   \n".into());
        assert!(!section.has_content());
        section.draft = Some("Text".into());
        assert!(section.has_content());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&SectionStatus::Researching).unwrap();
        assert_eq!(json, "\"researching\"");
    }
}
