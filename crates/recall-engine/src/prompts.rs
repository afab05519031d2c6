use serde_json::Value;

/// Byte budget for tool payloads embedded in an observation prompt. Payloads
/// beyond it are middle-truncated so both the opening and closing structure
/// survive.
pub const MAX_TOOL_TEXT: usize = 4_000;

/// The extractor system prompt: mode boilerplate plus session identifiers.
/// This is the policy carrier and is preserved across history truncation.
pub fn extractor_system_prompt(
    project: &str,
    content_session_id: &str,
    user_prompt: &str,
) -> String {
    format!(
        r#"You are a memory extractor observing a developer's coding session. You receive
tool invocations from the primary session and distill each into compact observations.

Project: {project}
Session: {content_session_id}
The developer's opening request:
{user_prompt}

For each message, respond with zero or more <observation> elements:

<observation>
  <type>discovery|bugfix|feature|refactor|decision|change</type>
  <title>imperative summary, at most 80 characters</title>
  <subtitle>optional qualifier</subtitle>
  <narrative>one to three sentences of prose</narrative>
  <facts>
    <fact>one short standalone fact</fact>
  </facts>
  <concepts>
    <concept>tag</concept>
  </concepts>
  <files_read><file>/path</file></files_read>
  <files_modified><file>/path</file></files_modified>
</observation>

Only record what the tool output establishes. Routine reads with nothing
noteworthy deserve no observation at all. When asked for a session summary,
respond with a single <summary> element containing <request>, <investigated>,
<learned>, <completed>, <next_steps>, and <notes>."#
    )
}

/// First user turn of a fresh extractor conversation.
pub fn init_prompt(project: &str, user_prompt: &str) -> String {
    format!(
        "A new session is starting in project '{project}'. The developer asked:\n\
         {user_prompt}\n\
         Acknowledge briefly; observations will follow."
    )
}

/// Observation-extraction prompt for one tool invocation.
pub fn observation_prompt(
    tool_name: &str,
    tool_input: &Value,
    tool_response: &Value,
    cwd: Option<&str>,
) -> String {
    let input = truncate_middle(&pretty(tool_input), MAX_TOOL_TEXT);
    let output = truncate_middle(&pretty(tool_response), MAX_TOOL_TEXT);

    format!(
        "<observed_from_primary_session>\n\
         <tool>{tool_name}</tool>\n\
         <parameters>\n{input}\n</parameters>\n\
         <outcome>\n{output}\n</outcome>\n\
         <cwd>{}</cwd>\n\
         </observed_from_primary_session>\n\
         Extract observations from this tool use.",
        cwd.unwrap_or("")
    )
}

/// Summary prompt combining the opening request and the host's last reply.
pub fn summary_prompt(user_prompt: &str, last_assistant_message: Option<&str>) -> String {
    format!(
        "The session is ending. The developer's opening request was:\n\
         {user_prompt}\n\
         The assistant's final message was:\n\
         {}\n\
         Produce the single <summary> element now.",
        last_assistant_message.unwrap_or("(none)")
    )
}

fn pretty(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Middle truncation to a character budget with an explicit marker. Keeps
/// the head (where structure opens) and the tail (where it closes).
pub fn truncate_middle(text: &str, budget: usize) -> String {
    let total = text.chars().count();
    if total <= budget {
        return text.to_string();
    }

    let keep_head = budget * 2 / 3;
    let keep_tail = budget - keep_head;
    let removed = total - keep_head - keep_tail;

    let head: String = text.chars().take(keep_head).collect();
    let tail: String = text
        .chars()
        .skip(total - keep_tail)
        .collect();
    format!("{head}\n[TRUNCATED {removed} chars]\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_middle_under_budget_is_identity() {
        assert_eq!(truncate_middle("short", 100), "short");
    }

    #[test]
    fn test_truncate_middle_keeps_head_and_tail() {
        let text = format!("HEAD{}TAIL", "x".repeat(10_000));
        let truncated = truncate_middle(&text, 1_000);

        assert!(truncated.starts_with("HEAD"));
        assert!(truncated.ends_with("TAIL"));
        assert!(truncated.contains("[TRUNCATED"));
        assert!(truncated.chars().count() < 1_100);
    }

    #[test]
    fn test_oversized_tool_output_preserves_prompt_structure() {
        let big_output = json!({ "content": "line\n".repeat(2_000) });
        let prompt = observation_prompt(
            "Read",
            &json!({"file_path": "/tmp/a.ts"}),
            &big_output,
            Some("/tmp"),
        );

        assert!(prompt.contains("<observed_from_primary_session>"));
        assert!(prompt.contains("</observed_from_primary_session>"));
        assert!(prompt.contains("<parameters>"));
        assert!(prompt.contains("<outcome>"));
        assert!(prompt.contains("[TRUNCATED"));
        assert!(prompt.contains("<tool>Read</tool>"));
    }

    #[test]
    fn test_system_prompt_carries_identifiers() {
        let prompt = extractor_system_prompt("recall", "sess-42", "add a reaper");
        assert!(prompt.contains("recall"));
        assert!(prompt.contains("sess-42"));
        assert!(prompt.contains("add a reaper"));
        assert!(prompt.contains("<observation>"));
    }
}
