//! Turning search results into prompt-ready sources.
//!
//! Documents are deduplicated by URL, their bodies are capped at a token
//! budget, and they are rendered as a plain-text block for prompts.

use super::section::Source;
use crate::brain::TokenCounter;
use crate::search::SearchDocument;
use std::collections::HashSet;
use std::fmt::Write;

const TRUNCATION_MARKER: &str = "... [truncated]";

/// Drop documents whose URL was already seen, keeping first occurrences in order.
pub fn dedupe_documents(docs: Vec<SearchDocument>) -> Vec<SearchDocument> {
    let mut seen = HashSet::new();
    docs.into_iter()
        .filter(|d| seen.insert(d.url.clone()))
        .collect()
}

/// Converts search documents into sources, truncating bodies to a token budget.
pub struct SourcePreparer {
    counter: TokenCounter,
    max_tokens_per_source: usize,
}

impl SourcePreparer {
    pub fn new(model: &str, max_tokens_per_source: usize) -> Self {
        Self {
            counter: TokenCounter::for_model(model),
            max_tokens_per_source,
        }
    }

    /// Build sources for one query's results.
    pub fn prepare(&self, docs: Vec<SearchDocument>, query: &str, iteration: u32) -> Vec<Source> {
        docs.into_iter()
            .map(|doc| {
                let (content, truncated) = match doc.content {
                    Some(body) => {
                        let (mut text, truncated) =
                            self.counter.truncate(&body, self.max_tokens_per_source);
                        if truncated {
                            text.push_str(TRUNCATION_MARKER);
                        }
                        (Some(text), truncated)
                    }
                    None => (None, false),
                };
                Source {
                    title: doc.title,
                    url: doc.url,
                    snippet: doc.snippet,
                    content,
                    truncated,
                    query: query.to_string(),
                    iteration,
                }
            })
            .collect()
    }

    /// Render documents for the planner's context, deduplicated and truncated.
    pub fn format_documents(&self, docs: Vec<SearchDocument>) -> String {
        let sources = self.prepare(dedupe_documents(docs), "", 0);
        format_sources(&sources)
    }
}

/// Render sources as a prompt block. Empty input yields an empty string.
pub fn format_sources(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::new();
    }
    let mut out = String::from("Sources:\n\n");
    for (i, source) in sources.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}", i + 1, source.title);
        let _ = writeln!(out, "URL: {}", source.url);
        if !source.snippet.is_empty() {
            let _ = writeln!(out, "Summary: {}", source.snippet);
        }
        if let Some(content) = &source.content {
            let _ = writeln!(out, "Content: {content}");
        }
        out.push('\n');
    }
    out
}
