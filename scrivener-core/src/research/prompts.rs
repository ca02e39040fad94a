//! Prompt builders for each completion purpose.
//!
//! User-controlled text (topic, feedback, report structure) is wrapped in tags
//! and escaped so it cannot close them.

use super::plan::Plan;
use super::section::Section;
use crate::types::{CompletionPurpose, CompletionRequest};

/// Longest user-controlled string embedded in a prompt, in chars.
const MAX_USER_TEXT: usize = 8_000;

/// Escape and truncate user input for inclusion inside a prompt tag.
///
/// Replaces `<` and `>` with entities and strips control characters other
/// than `\n` and `\t`.
pub fn escape_user_text(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars().take(MAX_USER_TEXT) {
        match ch {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            c if c.is_control() && c != '\n' && c != '\t' => {}
            c => result.push(c),
        }
    }
    result
}

pub fn plan_queries(topic: &str, structure: &str, count: usize) -> CompletionRequest {
    let system = format!(
        "You are an expert technical writer helping to plan a report.\n\
         Generate {count} web search queries that will help gather context for planning \
         the sections of the report.\n\
         Respond with JSON only: {{\"queries\": [\"...\"]}}"
    );
    let user = format!(
        "<topic>{}</topic>\n<report_structure>{}</report_structure>",
        escape_user_text(topic),
        escape_user_text(structure)
    );
    CompletionRequest::new(CompletionPurpose::PlanQueries, system, user)
}

pub fn plan(
    topic: &str,
    structure: &str,
    context: &str,
    feedback: Option<&str>,
    prior_plan: Option<&Plan>,
) -> CompletionRequest {
    let system = "You are an expert technical writer planning a report.\n\
                  Produce the sections of the report. Each section has a name, a one-line \
                  description of what it covers, and whether it needs web research. \
                  Introductions and conclusions synthesize other sections and do not need research.\n\
                  Respond with JSON only: \
                  {\"sections\": [{\"name\": \"...\", \"description\": \"...\", \"research\": true}]}";

    let mut user = format!(
        "<topic>{}</topic>\n<report_structure>{}</report_structure>\n",
        escape_user_text(topic),
        escape_user_text(structure)
    );
    if !context.is_empty() {
        user.push_str(&format!("<context>\n{context}</context>\n"));
    }
    if let Some(prior) = prior_plan {
        user.push_str(&format!("<previous_plan>\n{}</previous_plan>\n", prior.render()));
    }
    if let Some(feedback) = feedback {
        user.push_str(&format!(
            "<feedback>{}</feedback>\nRevise the plan to address this feedback. \
             Return the complete replacement plan.\n",
            escape_user_text(feedback)
        ));
    }
    CompletionRequest::new(CompletionPurpose::Plan, system, user)
}

pub fn section_queries(topic: &str, section: &Section, count: usize) -> CompletionRequest {
    let system = format!(
        "You are an expert technical writer researching one section of a report.\n\
         Generate {count} web search queries that gather the material this section needs.\n\
         Respond with JSON only: {{\"queries\": [\"...\"]}}"
    );
    let mut user = section_header(topic, section);
    if let Some(draft) = &section.draft {
        user.push_str(&format!("<current_draft>\n{draft}\n</current_draft>\n"));
    }
    if !section.executed_queries.is_empty() {
        user.push_str(&format!(
            "<previous_queries>{}</previous_queries>\nDo not repeat these.\n",
            section.executed_queries.join("; ")
        ));
    }
    CompletionRequest::new(CompletionPurpose::SectionQueries, system, user)
}

pub fn section_write(topic: &str, section: &Section, sources: &str) -> CompletionRequest {
    let system = "You are an expert technical writer.\n\
                  Write the section of the report described below using the provided sources. \
                  Extend or rewrite the existing draft when there is one. \
                  Respond with the section body only.";
    let mut user = section_header(topic, section);
    if let Some(draft) = &section.draft {
        user.push_str(&format!("<existing_draft>\n{draft}\n</existing_draft>\n"));
    }
    user.push_str(&format!("<sources>\n{sources}</sources>\n"));
    CompletionRequest::new(CompletionPurpose::SectionWrite, system, user)
}

pub fn section_grade(topic: &str, section: &Section, count: usize) -> CompletionRequest {
    let system = format!(
        "You are reviewing one section of a report.\n\
         Decide whether the draft covers the section's topic with sufficient depth. \
         If it does not, propose up to {count} follow-up search queries that would fill the gaps.\n\
         Respond with JSON only: {{\"grade\": \"pass\" | \"fail\", \"follow_up_queries\": [\"...\"]}}"
    );
    let mut user = section_header(topic, section);
    user.push_str(&format!(
        "<draft>\n{}\n</draft>\n",
        section.draft.as_deref().unwrap_or_default()
    ));
    CompletionRequest::new(CompletionPurpose::SectionGrade, system, user)
}

pub fn structural_write(topic: &str, section: &Section, researched: &str) -> CompletionRequest {
    let system = "You are an expert technical writer.\n\
                  Write the section described below. It does not use new research; \
                  synthesize it from the completed sections of the report. \
                  Respond with the section body only.";
    let mut user = section_header(topic, section);
    user.push_str(&format!("<completed_sections>\n{researched}</completed_sections>\n"));
    CompletionRequest::new(CompletionPurpose::StructuralWrite, system, user)
}

fn section_header(topic: &str, section: &Section) -> String {
    format!(
        "<topic>{}</topic>\n<section_name>{}</section_name>\n<section_description>{}</section_description>\n",
        escape_user_text(topic),
        escape_user_text(&section.name),
        escape_user_text(&section.description)
    )
}
