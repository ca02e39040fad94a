//! Structured output from completion text.
//!
//! Models are asked to answer with a JSON object; the object is located between
//! the first `{` and the last `}` so markdown fences and surrounding prose are
//! tolerated. Anything that still fails to deserialize is a malformed response.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;

/// Extract and deserialize the JSON object embedded in `response`.
///
/// `{` and `}` are single-byte ASCII, so the byte offsets from `find`/`rfind`
/// are always valid slice boundaries.
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T, String> {
    let start = response
        .find('{')
        .ok_or_else(|| "no JSON object in response".to_string())?;
    let end = response
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| "unterminated JSON object in response".to_string())?;
    serde_json::from_str(&response[start..=end]).map_err(|e| e.to_string())
}

/// `{"queries": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct QueryList {
    pub queries: Vec<String>,
}

/// `{"sections": [{"name", "description", "research"}]}`
#[derive(Debug, Clone, Deserialize)]
pub struct PlanOutput {
    pub sections: Vec<PlanOutputSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanOutputSection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub research: bool,
}

/// Sufficiency verdict for a section draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Pass,
    Fail,
}

/// `{"grade": "pass"|"fail", "follow_up_queries": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct GradeOutput {
    pub grade: Grade,
    #[serde(default)]
    pub follow_up_queries: Vec<String>,
}

/// Trim, drop blanks and duplicates, and keep at most `limit` queries.
pub fn normalize_queries(queries: Vec<String>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty() && seen.insert(q.to_lowercase()))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let parsed: QueryList = parse_json(r#"{"queries": ["a", "b"]}"#).unwrap();
        assert_eq!(parsed.queries, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "Here you go:\n```json\n{\"grade\": \"fail\", \"follow_up_queries\": [\"x\"]}\n```";
        let parsed: GradeOutput = parse_json(text).unwrap();
        assert_eq!(parsed.grade, Grade::Fail);
        assert_eq!(parsed.follow_up_queries, vec!["x"]);
    }

    #[test]
    fn test_parse_grade_without_follow_ups() {
        let parsed: GradeOutput = parse_json(r#"{"grade": "pass"}"#).unwrap();
        assert_eq!(parsed.grade, Grade::Pass);
        assert!(parsed.follow_up_queries.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_object() {
        let err = parse_json::<QueryList>("no json here").unwrap_err();
        assert_eq!(err, "no JSON object in response");
        assert!(parse_json::<QueryList>("} backwards {").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(parse_json::<GradeOutput>(r#"{"grade": "maybe"}"#).is_err());
        assert!(parse_json::<PlanOutput>(r#"{"sections": [{"description": "x"}]}"#).is_err());
    }

    #[test]
    fn test_normalize_queries() {
        let queries = vec![
            "  tokio scheduler ".into(),
            "".into(),
            "Tokio Scheduler".into(),
            "work stealing".into(),
            "io_uring".into(),
        ];
        assert_eq!(
            normalize_queries(queries, 2),
            vec!["tokio scheduler", "work stealing"]
        );
    }
}
