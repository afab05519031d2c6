use crate::error::{Error, Result};
use crate::traits::{ChatMessage, ChatProvider, ChatReply};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

/// OpenAI-compatible `/chat/completions` client.
///
/// Covers LM Studio, OpenRouter, Gemini's compatibility endpoint, and any
/// other server speaking the same shape. Stateless: the full (truncated)
/// history is posted on every call and no session id comes back.
pub struct OpenAiCompatProvider {
    name: &'static str,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: &'static str,
        base_url: &str,
        model: &str,
        api_key: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            name,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    pub fn lmstudio(base_url: &str, model: &str) -> Self {
        Self::new("lmstudio", base_url, model, None)
    }

    pub fn openrouter(model: &str, api_key: Option<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", model, api_key)
    }

    pub fn gemini(model: &str, api_key: Option<String>) -> Self {
        Self::new(
            "gemini",
            "https://generativelanguage.googleapis.com/v1beta/openai",
            model,
            api_key,
        )
    }

    fn format_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| {
                json!({
                    "role": message.role.as_str(),
                    "content": message.content,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&json!({
                "model": self.model,
                "messages": Self::format_messages(messages),
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(Error::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                code: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| Error::InvalidResponse(err.to_string()))?;
        let text = body["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| {
                Error::InvalidResponse(format!(
                    "no choices[0].message.content in: {}",
                    body.to_string().chars().take(300).collect::<String>()
                ))
            })?;

        Ok(ChatReply {
            text: text.to_string(),
            provider_session_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Role;

    #[test]
    fn test_message_formatting() {
        let messages = vec![
            ChatMessage::system("extract observations"),
            ChatMessage::user("tool output here"),
        ];

        let formatted = OpenAiCompatProvider::format_messages(&messages);
        assert_eq!(formatted[0]["role"], "system");
        assert_eq!(formatted[1]["role"], "user");
        assert_eq!(formatted[1]["content"], "tool output here");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        // nothing listens on this port
        let provider = OpenAiCompatProvider::lmstudio("http://127.0.0.1:9", "test-model");
        let err = provider
            .send(&[ChatMessage::user("hello")])
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got non-transient error: {}", err);
    }
}
