//! Final report assembly.
//!
//! Runs once every research section is terminal. Sections that are not
//! researched (introduction, conclusion) are written from the researched
//! content, then all sections are joined in plan order.

use super::prompts;
use super::section::{Section, SectionOutcome, SectionStatus};
use crate::config::RetryConfig;
use crate::error::CompileError;
use crate::providers::{StageProviders, complete_text};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Separator placed between rendered sections.
pub const SECTION_SEPARATOR: &str = "\n\n";

/// Per-section metadata carried alongside the report body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub ordinal: usize,
    pub name: String,
    pub researched: bool,
    pub status: SectionStatus,
    pub outcome: Option<SectionOutcome>,
    pub source_count: usize,
}

/// A source cited anywhere in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
}

/// The compiled report. Immutable once stored on the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    /// Markdown body: every section in ordinal order.
    pub body: String,
    pub sections: Vec<DocumentSection>,
    pub sources: Vec<SourceRef>,
}

/// Writes structural sections and compiles the final document.
pub struct ReportAssembler {
    providers: StageProviders,
    retry: RetryConfig,
}

impl ReportAssembler {
    pub fn new(providers: StageProviders, retry: RetryConfig) -> Self {
        Self { providers, retry }
    }

    /// Compile `sections` (in ordinal order) into a document.
    ///
    /// Fails with [`CompileError::IncompleteSections`] if any research section
    /// has no text; no partial document is produced.
    pub async fn assemble(&self, topic: &str, sections: &mut [Section]) -> Result<Document, CompileError> {
        ensure_researched(sections)?;
        let researched = render_researched(sections);
        let pending = pending_structural(sections);

        let writes = join_all(
            pending
                .iter()
                .map(|&i| self.write_structural(topic, &sections[i], &researched)),
        )
        .await;

        for (i, text) in pending.into_iter().zip(writes) {
            sections[i].finish_structural(text?)?;
        }

        Ok(self.finish(topic, sections))
    }

    /// Write the text of one structural section from the researched body.
    /// Returns the trimmed text; blank output is an error.
    pub async fn write_structural(
        &self,
        topic: &str,
        section: &Section,
        researched: &str,
    ) -> Result<String, CompileError> {
        let request = prompts::structural_write(topic, section, researched)
            .with_model(self.providers.writer_model.model.clone());
        let text = complete_text(self.providers.writer.as_ref(), request, &self.retry).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CompileError::EmptySection {
                section: section.name.clone(),
            });
        }
        debug!(section = %section.name, chars = text.len(), "Structural section written");
        Ok(text.to_string())
    }

    /// Compile sections that all have text.
    pub fn finish(&self, topic: &str, sections: &[Section]) -> Document {
        let document = compile(topic, sections);
        info!(
            sections = document.sections.len(),
            sources = document.sources.len(),
            chars = document.body.len(),
            "Report compiled"
        );
        document
    }
}

/// Reject sections that were meant to be researched but hold no text.
pub fn ensure_researched(sections: &[Section]) -> Result<(), CompileError> {
    let missing: Vec<String> = sections
        .iter()
        .filter(|s| s.requires_research && !s.has_content())
        .map(|s| s.name.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CompileError::IncompleteSections { sections: missing })
    }
}

/// Rendered research sections, given to structural writes as context.
pub fn render_researched(sections: &[Section]) -> String {
    render_sections(sections.iter().filter(|s| s.requires_research))
}

/// Indices of structural sections still without text.
pub fn pending_structural(sections: &[Section]) -> Vec<usize> {
    sections
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.requires_research && !s.has_content())
        .map(|(i, _)| i)
        .collect()
}

/// Build the document from sections that all have text.
pub fn compile(topic: &str, sections: &[Section]) -> Document {
    let mut ordered: Vec<&Section> = sections.iter().collect();
    ordered.sort_by_key(|s| s.ordinal);

    let body = ordered
        .iter()
        .map(|s| render_section(s))
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);

    let mut seen = HashSet::new();
    let sources = ordered
        .iter()
        .flat_map(|s| s.sources.iter())
        .filter(|src| seen.insert(src.url.as_str()))
        .map(|src| SourceRef {
            title: src.title.clone(),
            url: src.url.clone(),
        })
        .collect();

    Document {
        title: topic.to_string(),
        body,
        sections: ordered
            .iter()
            .map(|s| DocumentSection {
                ordinal: s.ordinal,
                name: s.name.clone(),
                researched: s.requires_research,
                status: s.status,
                outcome: s.outcome,
                source_count: s.sources.len(),
            })
            .collect(),
        sources,
    }
}

fn render_section(section: &Section) -> String {
    format!(
        "## {}\n\n{}",
        section.name,
        section.draft.as_deref().unwrap_or_default().trim()
    )
}

fn render_sections<'a>(sections: impl Iterator<Item = &'a Section>) -> String {
    sections
        .map(|s| format!("{}{SECTION_SEPARATOR}", render_section(s)))
        .collect()
}
