use serde::{Deserialize, Serialize};
use std::fmt;

/// Titles longer than this are clamped at parse time.
pub const TITLE_MAX_CHARS: usize = 80;

/// Classification of a single captured unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObservationType {
    #[default]
    Discovery,
    Bugfix,
    Feature,
    Refactor,
    Decision,
    Change,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Discovery => "discovery",
            ObservationType::Bugfix => "bugfix",
            ObservationType::Feature => "feature",
            ObservationType::Refactor => "refactor",
            ObservationType::Decision => "decision",
            ObservationType::Change => "change",
        }
    }

    /// Lenient parse: unrecognized values fall back to `discovery`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "bugfix" => ObservationType::Bugfix,
            "feature" => ObservationType::Feature,
            "refactor" => ObservationType::Refactor,
            "decision" => ObservationType::Decision,
            "change" => ObservationType::Change,
            _ => ObservationType::Discovery,
        }
    }
}

impl fmt::Display for ObservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One structured capture extracted from a tool invocation.
///
/// This is the parsed shape produced by the extractor LLM, before the store
/// assigns an id. `narrative` and `text` are embedded as separate vector
/// documents; each fact is embedded on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParsedObservation {
    #[serde(rename = "type")]
    pub kind: ObservationType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
}

/// End-of-session roll-up: six free-form fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParsedSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investigated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ParsedSummary {
    /// Field name/value pairs in a stable order, skipping empty fields.
    pub fn non_empty_fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("request", &self.request),
            ("investigated", &self.investigated),
            ("learned", &self.learned),
            ("completed", &self.completed),
            ("next_steps", &self.next_steps),
            ("notes", &self.notes),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(|v| (name, v))
        })
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.non_empty_fields().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_parse_lenient_defaults_to_discovery() {
        assert_eq!(
            ObservationType::parse_lenient("bugfix"),
            ObservationType::Bugfix
        );
        assert_eq!(
            ObservationType::parse_lenient("  DECISION "),
            ObservationType::Decision
        );
        assert_eq!(
            ObservationType::parse_lenient("nonsense"),
            ObservationType::Discovery
        );
        assert_eq!(ObservationType::parse_lenient(""), ObservationType::Discovery);
    }

    #[test]
    fn test_summary_non_empty_fields_ordered() {
        let summary = ParsedSummary {
            request: Some("add caching".to_string()),
            investigated: None,
            learned: Some("   ".to_string()),
            completed: Some("done".to_string()),
            next_steps: None,
            notes: None,
        };

        let fields = summary.non_empty_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], ("request", "add caching"));
        assert_eq!(fields[1], ("completed", "done"));
    }

    #[test]
    fn test_observation_serde_round_trip() {
        let obs = ParsedObservation {
            kind: ObservationType::Bugfix,
            title: "Fix race in reaper".to_string(),
            facts: vec!["registry pruned".to_string()],
            ..Default::default()
        };

        let json = serde_json::to_string(&obs).unwrap();
        assert!(json.contains("\"type\":\"bugfix\""));
        let back: ParsedObservation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, obs);
    }
}
