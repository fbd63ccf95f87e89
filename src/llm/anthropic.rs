//! Anthropic Messages API client (reqwest).

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::{CompletionBackend, CompletionRequest, CompletionResponse};
use serde::Serialize;
use std::time::Duration;

/// Messages API request body.
#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [WireMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// HTTP client for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl CompletionBackend for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let messages_url = format!("{}/v1/messages", self.base_url);

        let body = MessagesBody {
            model: &request.model,
            max_tokens: request.max_tokens,
            messages: [WireMessage { role: "user", content: &request.message }],
            system: request.system.as_deref(),
        };

        let response = self
            .http
            .post(&messages_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::Request(format!("failed to read response body: {e}")))?;

        let response_body: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| {
                LlmError::MalformedResponse(format!(
                    "response ({status}) is not valid JSON: {e}\nBody: {}",
                    truncate_body(&response_text)
                ))
            })?;

        if !status.is_success() {
            let message = response_body["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        parse_messages_response(&response_body)
    }
}

/// Extract the first text content block and token usage.
fn parse_messages_response(body: &serde_json::Value) -> Result<CompletionResponse, LlmError> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| LlmError::MalformedResponse("missing content array".into()))?;

    let text = content
        .iter()
        .find(|block| block["type"] == "text")
        .and_then(|block| block["text"].as_str())
        .ok_or_else(|| LlmError::MalformedResponse("no text content block".into()))?
        .to_string();

    Ok(CompletionResponse {
        text,
        input_tokens: body["usage"]["input_tokens"].as_i64().unwrap_or(0),
        output_tokens: body["usage"]["output_tokens"].as_i64().unwrap_or(0),
    })
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_omits_absent_system() {
        let body = MessagesBody {
            model: "m",
            max_tokens: 5,
            messages: [WireMessage { role: "user", content: "hi" }],
            system: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn parses_first_text_block_and_usage() {
        let body = serde_json::json!({
            "content": [
                { "type": "tool_use", "name": "noop" },
                { "type": "text", "text": "47 times." },
            ],
            "usage": { "input_tokens": 1200, "output_tokens": 8 },
        });

        let parsed = parse_messages_response(&body).unwrap();
        assert_eq!(parsed.text, "47 times.");
        assert_eq!(parsed.input_tokens, 1200);
        assert_eq!(parsed.output_tokens, 8);
    }

    #[test]
    fn missing_text_block_is_an_error() {
        let body = serde_json::json!({ "content": [], "usage": {} });
        assert!(parse_messages_response(&body).is_err());
    }
}
