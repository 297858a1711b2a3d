use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Client for an OpenAI-compatible completion + embedding endpoint.
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: String,
    embedding_model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: Option<String>, embedding_model: String) -> Self {
        Self {
            api_url,
            api_key: api_key.unwrap_or_default(),
            embedding_model,
            client: reqwest::Client::new(),
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        // Key is optional for local endpoints
        if self.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    /// Request a plain-text completion from the given model
    pub async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        self.chat(model, vec![Message::user(prompt)], None).await
    }

    /// Request a structured completion and parse it into `T`
    pub async fn complete_json<T>(&self, model: &str, prompt: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .chat(
                model,
                vec![Message::user(prompt)],
                Some(json!({"type": "json_object"})),
            )
            .await?;
        parse_json_response(&response)
    }

    async fn chat(
        &self,
        model: &str,
        messages: Vec<Message>,
        response_format: Option<serde_json::Value>,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            temperature: Some(0.7),
            max_tokens: Some(2000),
            response_format,
        };

        let response = self
            .authorized(self.client.post(&url).json(&request))
            .send()
            .await
            .context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?;

        Ok(content)
    }

    /// Embed a single text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.api_url);

        let response = self
            .authorized(self.client.post(&url).json(&json!({
                "model": self.embedding_model,
                "input": [text],
            })))
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Embedding API returned error {}: {}", status, body);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no vectors"))
    }
}

/// Parse a model response as JSON, tolerating markdown fences and surrounding
/// prose. Models routinely wrap JSON in ```json blocks or prepend commentary.
pub fn parse_json_response<T>(response: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    if let Ok(parsed) = serde_json::from_str::<T>(response) {
        return Ok(parsed);
    }

    let json_content = if let Some(start) = response.find("```json") {
        let after_start = &response[start + 7..];
        if let Some(end) = after_start.find("```") {
            after_start[..end].trim()
        } else {
            response
        }
    } else if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            &response[start..=end]
        } else {
            response
        }
    } else {
        response
    };

    serde_json::from_str::<T>(json_content).context(format!(
        "Failed to parse JSON response. Raw response: {}",
        response.chars().take(500).collect::<String>()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        best_index: i64,
    }

    #[test]
    fn parses_bare_json() {
        let verdict: Verdict = parse_json_response(r#"{"best_index": 3}"#).expect("parse");
        assert_eq!(verdict.best_index, 3);
    }

    #[test]
    fn parses_json_inside_markdown_fence() {
        let raw = "Here is my decision:\n```json\n{\"best_index\": 1}\n```\nDone.";
        let verdict: Verdict = parse_json_response(raw).expect("parse");
        assert_eq!(verdict.best_index, 1);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let raw = "I considered the options and chose {\"best_index\": 2} for relevance.";
        let verdict: Verdict = parse_json_response(raw).expect("parse");
        assert_eq!(verdict.best_index, 2);
    }

    #[test]
    fn rejects_non_json_output() {
        let result: Result<Verdict> = parse_json_response("no structured answer here");
        assert!(result.is_err());
    }
}
