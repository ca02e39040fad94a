//! Per-section research loop: formulate queries, search, write, grade, repeat.
//!
//! The loop owns its [`Section`] while it runs and reports a snapshot after
//! every completed step. The receiver (the orchestrator) is the only writer of
//! the run's section arena; it checkpoints each snapshot, so a restarted loop
//! picks up at `section.step` without repeating finished provider calls.

use super::prompts;
use super::section::{ResearchStep, Section, SectionOutcome, SectionStatus};
use super::sources::{SourcePreparer, format_sources};
use super::structured::{Grade, GradeOutput, QueryList, normalize_queries, parse_json};
use crate::config::{ExhaustionPolicy, ResearchConfig};
use crate::error::{ProviderError, ResearchError};
use crate::providers::{StageProviders, complete_text, with_retry};
use crate::types::CompletionRequest;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs the research loop for sections of one run.
pub struct ResearchLoop {
    topic: String,
    providers: StageProviders,
    config: ResearchConfig,
    preparer: SourcePreparer,
}

impl ResearchLoop {
    pub fn new(topic: impl Into<String>, providers: StageProviders, config: ResearchConfig) -> Self {
        let preparer = SourcePreparer::new(&providers.writer_model.model, config.max_tokens_per_source);
        Self {
            topic: topic.into(),
            providers,
            config,
            preparer,
        }
    }

    /// Drive `section` to a terminal status, sending a snapshot after each step.
    ///
    /// Stops early (returning the section as it stands) when `cancel` fires or
    /// the progress receiver is gone. Terminal sections are returned untouched.
    pub async fn run(
        &self,
        mut section: Section,
        progress: mpsc::Sender<Section>,
        cancel: CancellationToken,
    ) -> Result<Section, ResearchError> {
        if section.is_terminal() {
            return Ok(section);
        }
        if section.status == SectionStatus::Pending {
            section.transition(SectionStatus::Researching)?;
            if progress.send(section.clone()).await.is_err() {
                return Ok(section);
            }
        }

        while !section.is_terminal() {
            if cancel.is_cancelled() {
                debug!(section = %section.name, "Research loop cancelled");
                return Ok(section);
            }
            self.step(&mut section).await?;
            if progress.send(section.clone()).await.is_err() {
                return Ok(section);
            }
        }

        info!(
            section = %section.name,
            status = %section.status,
            iterations = section.iteration,
            sources = section.sources.len(),
            "Section research finished"
        );
        Ok(section)
    }

    /// Execute exactly one step of the loop.
    pub async fn step(&self, section: &mut Section) -> Result<(), ResearchError> {
        match section.step {
            ResearchStep::Formulate => self.formulate(section).await,
            ResearchStep::Search => self.search(section).await,
            ResearchStep::Write => self.write(section).await,
            ResearchStep::Grade => self.grade(section).await,
            ResearchStep::Finished => Ok(()),
        }
    }

    async fn formulate(&self, section: &mut Section) -> Result<(), ResearchError> {
        let request = prompts::section_queries(&self.topic, section, self.config.number_of_queries);
        let text = self.complete(section, request).await?;
        let parsed: QueryList = parse_json(&text).map_err(|message| malformed(section, "queries", message))?;
        let queries = normalize_queries(parsed.queries, self.config.number_of_queries);
        if queries.is_empty() {
            return Err(malformed(section, "queries", "no usable queries".into()));
        }
        debug!(section = %section.name, queries = ?queries, "Queries formulated");
        section.pending_queries = queries;
        section.step = ResearchStep::Search;
        Ok(())
    }

    async fn search(&self, section: &mut Section) -> Result<(), ResearchError> {
        let queries = std::mem::take(&mut section.pending_queries);
        let iteration = section.iteration + 1;
        let search = self.providers.search.as_ref();
        let limit = self.config.search_result_limit;

        let results = join_all(queries.iter().map(|q| {
            with_retry(&self.config.retry, move || search.search(q, limit))
        }))
        .await;

        let mut added = 0;
        for (query, result) in queries.iter().zip(results) {
            let docs = match result {
                Ok(docs) => docs,
                Err(source) => {
                    // Restore the cursor so a retry repeats this search.
                    section.pending_queries = queries.clone();
                    return Err(provider_error(section, source));
                }
            };
            added += section.append_sources(self.preparer.prepare(docs, query, iteration));
        }

        if added == 0 {
            warn!(section = %section.name, iteration, "Search round found no new sources");
        }
        section.executed_queries.extend(queries);
        section.iteration = iteration;
        section.step = ResearchStep::Write;
        debug!(section = %section.name, iteration, added, "Search round complete");
        Ok(())
    }

    async fn write(&self, section: &mut Section) -> Result<(), ResearchError> {
        let sources = format_sources(&section.sources);
        let request = prompts::section_write(&self.topic, section, &sources);
        let text = self.complete(section, request).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(malformed(section, "write", "empty draft".into()));
        }
        section.draft = Some(text.to_string());
        section.step = ResearchStep::Grade;
        Ok(())
    }

    async fn grade(&self, section: &mut Section) -> Result<(), ResearchError> {
        let request = prompts::section_grade(&self.topic, section, self.config.number_of_queries);
        let text = self.complete(section, request).await?;
        let verdict: GradeOutput = parse_json(&text).map_err(|message| malformed(section, "grade", message))?;
        let follow_ups = normalize_queries(verdict.follow_up_queries, self.config.number_of_queries);
        section.follow_up_queries = follow_ups.clone();

        if verdict.grade == Grade::Pass {
            section.outcome = Some(SectionOutcome::Sufficient);
            return section.transition(SectionStatus::Complete);
        }

        if section.iteration >= self.config.max_search_depth {
            section.outcome = Some(SectionOutcome::DepthExhausted);
            let status = match self.config.exhaustion_policy {
                ExhaustionPolicy::BestEffort => SectionStatus::Complete,
                ExhaustionPolicy::Fail => SectionStatus::Failed,
            };
            info!(
                section = %section.name,
                iteration = section.iteration,
                status = %status,
                "Search depth exhausted"
            );
            return section.transition(status);
        }

        section.transition(SectionStatus::Researching)?;
        if follow_ups.is_empty() {
            section.step = ResearchStep::Formulate;
        } else {
            section.pending_queries = follow_ups;
            section.step = ResearchStep::Search;
        }
        Ok(())
    }

    async fn complete(&self, section: &Section, request: CompletionRequest) -> Result<String, ResearchError> {
        let request = request.with_model(self.providers.writer_model.model.clone());
        complete_text(self.providers.writer.as_ref(), request, &self.config.retry)
            .await
            .map_err(|source| provider_error(section, source))
    }
}

fn malformed(section: &Section, stage: &str, message: String) -> ResearchError {
    ResearchError::MalformedResponse {
        section: section.name.clone(),
        stage: stage.to_string(),
        message,
    }
}

fn provider_error(section: &Section, source: ProviderError) -> ResearchError {
    ResearchError::Provider {
        section: section.name.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::config::RetryConfig;
    use crate::research::plan::PlannedSection;
    use crate::search::MockSearchProvider;
    use crate::types::{CompletionPurpose, ModelSelector};
    use std::sync::Arc;

    fn section() -> Section {
        Section::from_planned(&PlannedSection {
            ordinal: 1,
            name: "Scheduler".into(),
            description: "Work-stealing design".into(),
            research: true,
        })
    }

    fn config(depth: u32, policy: ExhaustionPolicy) -> ResearchConfig {
        ResearchConfig {
            max_search_depth: depth,
            exhaustion_policy: policy,
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                backoff_multiplier: 1.0,
                jitter: false,
            },
            ..Default::default()
        }
    }

    fn research_loop(
        llm: Arc<MockLlmProvider>,
        search: Arc<MockSearchProvider>,
        config: ResearchConfig,
    ) -> ResearchLoop {
        let providers = StageProviders {
            planner: llm.clone(),
            planner_model: ModelSelector::new("mock", "planner"),
            writer: llm,
            writer_model: ModelSelector::new("mock", "writer"),
            search,
        };
        ResearchLoop::new("Tokio", providers, config)
    }

    /// Grades fail until the given number of grade calls, then pass.
    fn scripted_llm(pass_on_grade: usize, follow_ups: bool) -> Arc<MockLlmProvider> {
        let grades = std::sync::atomic::AtomicUsize::new(0);
        Arc::new(MockLlmProvider::with_handler(move |req| {
            Ok(match req.purpose {
                CompletionPurpose::SectionQueries => r#"{"queries": ["q one", "q two"]}"#.into(),
                CompletionPurpose::SectionWrite => "Draft text.".into(),
                CompletionPurpose::SectionGrade => {
                    let n = grades.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    if n >= pass_on_grade {
                        r#"{"grade": "pass"}"#.into()
                    } else if follow_ups {
                        format!(r#"{{"grade": "fail", "follow_up_queries": ["follow up {n}"]}}"#)
                    } else {
                        r#"{"grade": "fail", "follow_up_queries": []}"#.into()
                    }
                }
                _ => String::new(),
            })
        }))
    }

    async fn run_to_end(rl: &ResearchLoop, section: Section) -> (Result<Section, ResearchError>, Vec<Section>) {
        let (tx, mut rx) = mpsc::channel(64);
        let result = rl.run(section, tx, CancellationToken::new()).await;
        let mut snapshots = Vec::new();
        while let Some(s) = rx.recv().await {
            snapshots.push(s);
        }
        (result, snapshots)
    }

    #[tokio::test]
    async fn test_passes_on_first_grade() {
        let llm = scripted_llm(1, true);
        let search = Arc::new(MockSearchProvider::echo());
        let rl = research_loop(llm.clone(), search.clone(), config(2, ExhaustionPolicy::BestEffort));

        let (result, snapshots) = run_to_end(&rl, section()).await;
        let done = result.unwrap();
        assert_eq!(done.status, SectionStatus::Complete);
        assert_eq!(done.outcome, Some(SectionOutcome::Sufficient));
        assert_eq!(done.iteration, 1);
        assert_eq!(done.sources.len(), 2);
        assert_eq!(done.draft.as_deref(), Some("Draft text."));
        assert_eq!(search.queries(), vec!["q one", "q two"]);
        // start + formulate + search + write + grade
        assert_eq!(snapshots.len(), 5);
        assert_eq!(snapshots.last(), Some(&done));
    }

    #[tokio::test]
    async fn test_follow_up_queries_drive_next_iteration() {
        let llm = scripted_llm(2, true);
        let search = Arc::new(MockSearchProvider::echo());
        let rl = research_loop(llm.clone(), search.clone(), config(3, ExhaustionPolicy::BestEffort));

        let (result, _) = run_to_end(&rl, section()).await;
        let done = result.unwrap();
        assert_eq!(done.iteration, 2);
        assert_eq!(done.status, SectionStatus::Complete);
        // The second round searched the grader's follow-up instead of formulating again.
        assert_eq!(llm.call_count(CompletionPurpose::SectionQueries), 1);
        assert_eq!(search.queries(), vec!["q one", "q two", "follow up 1"]);
        assert_eq!(done.sources.last().unwrap().iteration, 2);
    }

    #[tokio::test]
    async fn test_reformulates_without_follow_ups() {
        let llm = scripted_llm(2, false);
        let rl = research_loop(
            llm.clone(),
            Arc::new(MockSearchProvider::echo()),
            config(3, ExhaustionPolicy::BestEffort),
        );
        let (result, _) = run_to_end(&rl, section()).await;
        assert_eq!(result.unwrap().iteration, 2);
        assert_eq!(llm.call_count(CompletionPurpose::SectionQueries), 2);
    }

    #[tokio::test]
    async fn test_depth_exhausted_best_effort() {
        let llm = scripted_llm(usize::MAX, true);
        let rl = research_loop(
            llm.clone(),
            Arc::new(MockSearchProvider::empty()),
            config(2, ExhaustionPolicy::BestEffort),
        );
        let (result, _) = run_to_end(&rl, section()).await;
        let done = result.unwrap();
        assert_eq!(done.status, SectionStatus::Complete);
        assert_eq!(done.outcome, Some(SectionOutcome::DepthExhausted));
        assert_eq!(done.iteration, 2);
        assert!(done.sources.is_empty());
        assert_eq!(llm.call_count(CompletionPurpose::SectionGrade), 2);
    }

    #[tokio::test]
    async fn test_depth_exhausted_fail_policy() {
        let llm = scripted_llm(usize::MAX, true);
        let rl = research_loop(
            llm,
            Arc::new(MockSearchProvider::empty()),
            config(1, ExhaustionPolicy::Fail),
        );
        let (result, _) = run_to_end(&rl, section()).await;
        let done = result.unwrap();
        assert_eq!(done.status, SectionStatus::Failed);
        assert_eq!(done.iteration, 1);
        assert!(done.has_content());
    }

    #[tokio::test]
    async fn test_malformed_grade_is_an_error() {
        let llm = Arc::new(MockLlmProvider::with_handler(|req| {
            Ok(match req.purpose {
                CompletionPurpose::SectionQueries => r#"{"queries": ["q"]}"#.into(),
                CompletionPurpose::SectionWrite => "Draft".into(),
                _ => "looks good to me".into(),
            })
        }));
        let rl = research_loop(
            llm,
            Arc::new(MockSearchProvider::echo()),
            config(2, ExhaustionPolicy::BestEffort),
        );
        let (result, snapshots) = run_to_end(&rl, section()).await;
        let err = result.unwrap_err();
        assert!(matches!(err, ResearchError::MalformedResponse { ref stage, .. } if stage == "grade"));
        // The last checkpointable state is right before grading.
        assert_eq!(snapshots.last().unwrap().step, ResearchStep::Grade);
    }

    #[tokio::test]
    async fn test_search_failure_keeps_cursor() {
        let llm = scripted_llm(1, true);
        let search = Arc::new(MockSearchProvider::echo());
        search.queue_error(ProviderError::AuthFailed {
            provider: "search".into(),
        });
        let rl = research_loop(llm, search, config(2, ExhaustionPolicy::BestEffort));

        let mut s = section();
        s.transition(SectionStatus::Researching).unwrap();
        rl.step(&mut s).await.unwrap();
        assert_eq!(s.step, ResearchStep::Search);

        let err = rl.step(&mut s).await.unwrap_err();
        assert!(matches!(err, ResearchError::Provider { .. }));
        assert_eq!(s.step, ResearchStep::Search);
        assert_eq!(s.pending_queries.len(), 2);
        assert_eq!(s.iteration, 0);

        // Retrying the step succeeds against the same queries.
        rl.step(&mut s).await.unwrap();
        assert_eq!(s.iteration, 1);
        assert_eq!(s.step, ResearchStep::Write);
    }

    #[tokio::test]
    async fn test_resumes_from_step_cursor() {
        let llm = scripted_llm(1, true);
        let rl = research_loop(
            llm.clone(),
            Arc::new(MockSearchProvider::echo()),
            config(2, ExhaustionPolicy::BestEffort),
        );
        let mut s = section();
        s.transition(SectionStatus::Researching).unwrap();
        s.iteration = 1;
        s.draft = Some("Existing".into());
        s.step = ResearchStep::Grade;

        let (result, _) = run_to_end(&rl, s).await;
        assert_eq!(result.unwrap().status, SectionStatus::Complete);
        assert_eq!(llm.call_count(CompletionPurpose::SectionQueries), 0);
        assert_eq!(llm.call_count(CompletionPurpose::SectionWrite), 0);
        assert_eq!(llm.call_count(CompletionPurpose::SectionGrade), 1);
    }

    #[tokio::test]
    async fn test_cancelled_loop_stops_before_next_step() {
        let llm = scripted_llm(1, true);
        let rl = research_loop(
            llm.clone(),
            Arc::new(MockSearchProvider::echo()),
            config(2, ExhaustionPolicy::BestEffort),
        );
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let s = rl.run(section(), tx, cancel).await.unwrap();
        assert_eq!(s.status, SectionStatus::Researching);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_section_untouched() {
        let llm = scripted_llm(1, true);
        let rl = research_loop(
            llm.clone(),
            Arc::new(MockSearchProvider::echo()),
            config(2, ExhaustionPolicy::BestEffort),
        );
        let mut s = section();
        s.transition(SectionStatus::Researching).unwrap();
        s.transition(SectionStatus::Complete).unwrap();
        let (result, snapshots) = run_to_end(&rl, s.clone()).await;
        assert_eq!(result.unwrap(), s);
        assert!(snapshots.is_empty());
        assert!(llm.calls().is_empty());
    }
}
