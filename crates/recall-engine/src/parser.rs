use once_cell::sync::Lazy;
use recall_types::{ObservationType, ParsedObservation, ParsedSummary, TITLE_MAX_CHARS};
use regex::Regex;

// Tolerant extraction of the assistant's XML. The extractor model is
// instructed but not guaranteed to emit well-formed markup: unknown tags are
// skipped, missing fields default, and a reply with no <observation> at all
// contributes zero observations, which is a valid outcome.

static OBSERVATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<observation\b[^>]*>(.*?)</observation>").unwrap());
static SUMMARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<summary\b[^>]*>(.*?)</summary>").unwrap());

/// Parse every <observation> element in an assistant reply.
pub fn parse_observations(text: &str) -> Vec<ParsedObservation> {
    OBSERVATION_RE
        .captures_iter(text)
        .map(|capture| parse_observation_block(&capture[1]))
        .collect()
}

fn parse_observation_block(block: &str) -> ParsedObservation {
    ParsedObservation {
        kind: tag(block, "type")
            .map(|t| ObservationType::parse_lenient(&t))
            .unwrap_or_default(),
        title: tag(block, "title")
            .filter(|t| !t.is_empty())
            .map(|t| clamp_title(&t))
            .unwrap_or_else(|| "Untitled".to_string()),
        subtitle: tag(block, "subtitle").filter(|t| !t.is_empty()),
        narrative: tag(block, "narrative").filter(|t| !t.is_empty()),
        text: tag(block, "text").filter(|t| !t.is_empty()),
        facts: list(block, "facts", "fact"),
        concepts: list(block, "concepts", "concept"),
        files_read: list(block, "files_read", "file"),
        files_modified: list(block, "files_modified", "file"),
    }
}

/// Parse the single <summary> element of a stop-turn reply. Falls back to
/// scanning the whole reply when the wrapper is missing; returns None when
/// nothing summary-shaped is present.
pub fn parse_summary(text: &str) -> Option<ParsedSummary> {
    let block = SUMMARY_RE
        .captures(text)
        .map(|capture| capture[1].to_string())
        .unwrap_or_else(|| text.to_string());

    let summary = ParsedSummary {
        request: tag(&block, "request"),
        investigated: tag(&block, "investigated"),
        learned: tag(&block, "learned"),
        completed: tag(&block, "completed"),
        next_steps: tag(&block, "next_steps"),
        notes: tag(&block, "notes"),
    };

    (!summary.is_empty()).then_some(summary)
}

/// First occurrence of <name>...</name>, trimmed. Tolerates attributes on
/// the opening tag.
fn tag(text: &str, name: &str) -> Option<String> {
    let open_plain = format!("<{name}>");
    let open_attr = format!("<{name} ");
    let close = format!("</{name}>");

    let content_start = if let Some(start) = text.find(&open_plain) {
        start + open_plain.len()
    } else {
        let start = text.find(&open_attr)?;
        text[start..].find('>')? + start + 1
    };

    let end = text[content_start..].find(&close)? + content_start;
    Some(text[content_start..end].trim().to_string())
}

/// All <inner> values under the first <outer> block; when no wrapper exists,
/// bare <inner> tags are accepted directly.
fn list(text: &str, outer: &str, inner: &str) -> Vec<String> {
    let scope = tag(text, outer).unwrap_or_else(|| text.to_string());
    let mut values = Vec::new();
    let mut remainder = scope.as_str();
    while let Some(value) = tag(remainder, inner) {
        let close = format!("</{inner}>");
        let Some(end) = remainder.find(&close) else {
            break;
        };
        if !value.is_empty() {
            values.push(value);
        }
        remainder = &remainder[end + close.len()..];
    }
    values
}

fn clamp_title(title: &str) -> String {
    if title.chars().count() <= TITLE_MAX_CHARS {
        title.to_string()
    } else {
        title.chars().take(TITLE_MAX_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_observation_parses() {
        let reply = r#"Noted. Here is what I observed:
<observation>
  <type>bugfix</type>
  <title>Fix stuck-message reset on restart</title>
  <subtitle>queue recovery</subtitle>
  <narrative>The in-flight marker was never cleared after a crash.</narrative>
  <facts>
    <fact>reset_stuck_messages clears in_flight</fact>
    <fact>rows become consumable again</fact>
  </facts>
  <concepts><concept>queue</concept></concepts>
  <files_read><file>/src/pending.rs</file></files_read>
  <files_modified><file>/src/pending.rs</file></files_modified>
</observation>"#;

        let observations = parse_observations(reply);
        assert_eq!(observations.len(), 1);
        let obs = &observations[0];
        assert_eq!(obs.kind, ObservationType::Bugfix);
        assert_eq!(obs.title, "Fix stuck-message reset on restart");
        assert_eq!(obs.facts.len(), 2);
        assert_eq!(obs.files_modified, vec!["/src/pending.rs"]);
    }

    #[test]
    fn test_missing_fields_default() {
        let reply = "<observation><narrative>just prose</narrative></observation>";

        let observations = parse_observations(reply);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].kind, ObservationType::Discovery);
        assert_eq!(observations[0].title, "Untitled");
        assert!(observations[0].facts.is_empty());
    }

    #[test]
    fn test_no_observation_element_is_zero_observations() {
        assert!(parse_observations("Nothing noteworthy here.").is_empty());
        assert!(parse_observations("").is_empty());
        // unclosed tag is not an observation
        assert!(parse_observations("<observation><title>x</title>").is_empty());
    }

    #[test]
    fn test_multiple_observations_in_one_reply() {
        let reply = "<observation><title>a</title></observation>\
                     ignored interstitial text\
                     <observation><title>b</title></observation>";
        let observations = parse_observations(reply);
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].title, "a");
        assert_eq!(observations[1].title, "b");
    }

    #[test]
    fn test_unrecognized_tags_are_skipped() {
        let reply = "<observation><title>t</title><confidence>0.9</confidence></observation>";
        let observations = parse_observations(reply);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].title, "t");
    }

    #[test]
    fn test_overlong_title_is_clamped() {
        let reply = format!(
            "<observation><title>{}</title></observation>",
            "t".repeat(300)
        );
        let observations = parse_observations(&reply);
        assert_eq!(observations[0].title.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn test_summary_parses_with_and_without_wrapper() {
        let wrapped = "<summary><request>add reaper</request><completed>added</completed></summary>";
        let summary = parse_summary(wrapped).unwrap();
        assert_eq!(summary.request.as_deref(), Some("add reaper"));
        assert_eq!(summary.completed.as_deref(), Some("added"));

        let bare = "<request>add reaper</request><notes>n</notes>";
        let summary = parse_summary(bare).unwrap();
        assert_eq!(summary.notes.as_deref(), Some("n"));

        assert!(parse_summary("no structure at all").is_none());
    }

    #[test]
    fn test_attributes_on_opening_tags_tolerated() {
        let reply = r#"<observation kind="x"><title attr="1">with attrs</title></observation>"#;
        let observations = parse_observations(reply);
        assert_eq!(observations[0].title, "with attrs");
    }
}
