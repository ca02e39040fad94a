//! Core types shared across the capability traits and the research stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a participant role in a completion conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// What a completion call is for. Providers may use it for routing or accounting;
/// test doubles use it to script responses per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPurpose {
    /// Search queries that give the planner context.
    PlanQueries,
    /// The report plan itself.
    Plan,
    /// Search queries for one research section.
    SectionQueries,
    /// Draft text for one research section.
    SectionWrite,
    /// Sufficiency grade for a section draft.
    SectionGrade,
    /// Text for a section that is written from completed research (intro, conclusion).
    StructuralWrite,
    #[default]
    General,
}

impl fmt::Display for CompletionPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompletionPurpose::PlanQueries => "plan_queries",
            CompletionPurpose::Plan => "plan",
            CompletionPurpose::SectionQueries => "section_queries",
            CompletionPurpose::SectionWrite => "section_write",
            CompletionPurpose::SectionGrade => "section_grade",
            CompletionPurpose::StructuralWrite => "structural_write",
            CompletionPurpose::General => "general",
        };
        write!(f, "{s}")
    }
}

/// A request to a completion provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub model: Option<String>,
    pub purpose: CompletionPurpose,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.0,
            max_tokens: None,
            model: None,
            purpose: CompletionPurpose::General,
        }
    }
}

impl CompletionRequest {
    /// Build a system + user request for the given purpose.
    pub fn new(purpose: CompletionPurpose, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
            purpose,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Concatenated text of all user messages.
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A response from a completion provider.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: Message,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

impl CompletionResponse {
    pub fn text(&self) -> &str {
        &self.message.content
    }
}

/// Token usage statistics from a completion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Selects a completion backend and model for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSelector {
    /// Provider name as registered in the provider registry (e.g., "openai", "anthropic").
    pub provider: String,
    /// Model identifier passed through to the provider.
    pub model: String,
}

impl ModelSelector {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello, world!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, world!");
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_completion_request_user_text() {
        let req = CompletionRequest::new(CompletionPurpose::Plan, "You plan reports.", "Topic: Rust");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.user_text(), "Topic: Rust");
        assert_eq!(req.purpose, CompletionPurpose::Plan);
        assert!(req.model.is_none());
    }

    #[test]
    fn test_purpose_serde() {
        let json = serde_json::to_string(&CompletionPurpose::SectionGrade).unwrap();
        assert_eq!(json, "\"section_grade\"");
        assert_eq!(CompletionPurpose::SectionGrade.to_string(), "section_grade");
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.accumulate(&TokenUsage {
            input_tokens: 3,
            output_tokens: 2,
        });
        assert_eq!(total.total(), 20);
    }

    #[test]
    fn test_model_selector_display() {
        let sel = ModelSelector::new("anthropic", "claude-sonnet");
        assert_eq!(sel.to_string(), "anthropic/claude-sonnet");
    }
}
