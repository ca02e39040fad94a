//! Plan stage: turns a topic (and optional feedback on a prior plan) into an
//! ordered, non-empty list of section stubs.

use super::prompts;
use super::sources::SourcePreparer;
use super::structured::{PlanOutput, QueryList, normalize_queries, parse_json};
use crate::config::{DEFAULT_REPORT_STRUCTURE, ResearchConfig};
use crate::error::PlanGenerationError;
use crate::providers::{StageProviders, complete_text, with_retry};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::{debug, info, warn};

/// A section stub produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSection {
    /// Position in the report, equal to the index in the plan.
    pub ordinal: usize,
    pub name: String,
    pub description: String,
    /// Whether the section is researched (vs. written from other sections).
    pub research: bool,
}

/// An ordered report plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub sections: Vec<PlannedSection>,
}

impl Plan {
    /// Build a plan, renumbering ordinals to match positions.
    pub fn new(sections: Vec<PlannedSection>) -> Self {
        let sections = sections
            .into_iter()
            .enumerate()
            .map(|(ordinal, s)| PlannedSection { ordinal, ..s })
            .collect();
        Self { sections }
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn research_sections(&self) -> impl Iterator<Item = &PlannedSection> {
        self.sections.iter().filter(|s| s.research)
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Human-readable rendering used for review and for re-planning prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for s in &self.sections {
            let _ = writeln!(
                out,
                "{}. {}{}\n   {}",
                s.ordinal + 1,
                s.name,
                if s.research { "" } else { " (no research)" },
                s.description
            );
        }
        out
    }
}

/// Generates report plans with the run's planner model.
pub struct Planner {
    providers: StageProviders,
    config: ResearchConfig,
}

impl Planner {
    pub fn new(providers: StageProviders, config: ResearchConfig) -> Self {
        Self { providers, config }
    }

    /// Produce a plan for `topic`.
    ///
    /// `structure` overrides the default report structure. With `feedback`,
    /// the prior plan and the feedback text are included and the result is a
    /// complete replacement.
    pub async fn generate_plan(
        &self,
        topic: &str,
        structure: Option<&str>,
        feedback: Option<&str>,
        prior: Option<&Plan>,
    ) -> Result<Plan, PlanGenerationError> {
        let structure = structure.unwrap_or(DEFAULT_REPORT_STRUCTURE);

        let context = if self.config.planner_context_search {
            self.gather_context(topic, structure).await?
        } else {
            String::new()
        };

        let request = prompts::plan(topic, structure, &context, feedback, prior)
            .with_model(self.providers.planner_model.model.clone());
        let text = complete_text(
            self.providers.planner.as_ref(),
            request,
            &self.config.retry,
        )
        .await?;

        let plan = parse_plan(&text)?;
        info!(
            sections = plan.len(),
            research_sections = plan.research_sections().count(),
            revised = feedback.is_some(),
            "Plan generated"
        );
        Ok(plan)
    }

    /// Search for background material the planner can use.
    async fn gather_context(&self, topic: &str, structure: &str) -> Result<String, PlanGenerationError> {
        let request = prompts::plan_queries(topic, structure, self.config.number_of_queries)
            .with_model(self.providers.planner_model.model.clone());
        let text = complete_text(
            self.providers.planner.as_ref(),
            request,
            &self.config.retry,
        )
        .await?;
        let queries: QueryList = parse_json(&text)
            .map_err(|message| PlanGenerationError::Unparseable { message })?;
        let queries = normalize_queries(queries.queries, self.config.number_of_queries);
        debug!(queries = ?queries, "Planning context queries");

        let search = self.providers.search.as_ref();
        let limit = self.config.search_result_limit;
        let results = join_all(queries.iter().map(|q| {
            with_retry(&self.config.retry, move || search.search(q, limit))
        }))
        .await;

        let mut docs = Vec::new();
        for result in results {
            docs.extend(result?);
        }
        if docs.is_empty() {
            warn!("Planning context search returned no documents");
        }
        let preparer = SourcePreparer::new(
            &self.providers.planner_model.model,
            self.config.max_tokens_per_source,
        );
        Ok(preparer.format_documents(docs))
    }
}

/// Parse planner output into a plan. Rejects unnamed sections and empty plans.
pub fn parse_plan(text: &str) -> Result<Plan, PlanGenerationError> {
    let output: PlanOutput =
        parse_json(text).map_err(|message| PlanGenerationError::Unparseable { message })?;

    let mut sections = Vec::with_capacity(output.sections.len());
    for (i, raw) in output.sections.into_iter().enumerate() {
        let name = raw.name.trim();
        if name.is_empty() {
            return Err(PlanGenerationError::Unparseable {
                message: format!("section {} has no name", i + 1),
            });
        }
        sections.push(PlannedSection {
            ordinal: i,
            name: name.to_string(),
            description: raw.description.trim().to_string(),
            research: raw.research,
        });
    }
    if sections.is_empty() {
        return Err(PlanGenerationError::Empty);
    }
    Ok(Plan::new(sections))
}
