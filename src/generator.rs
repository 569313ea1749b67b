//! The external call: a prompt goes in, model text comes out.

use crate::config::ApiConfig;
use crate::{PostforgeError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Model or backend identifier, recorded in logs.
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Google Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiClient {
    /// Reads the API key from the environment variables named in `config`.
    pub fn from_env(config: &ApiConfig) -> Result<Self> {
        let api_key = config
            .api_key_vars
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                PostforgeError::AuthenticationFailure(format!(
                    "no API key in environment (tried {})",
                    config.api_key_vars.join(", ")
                ))
            })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &ApiConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PostforgeError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                candidate_count: 1,
                max_output_tokens: self.max_output_tokens,
            },
        };

        // key travels in a header so it never shows up in reqwest's URL-bearing errors
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let reply: GeminiResponse = response.json().await.map_err(classify_transport)?;
        let text = reply
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<String>())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| PostforgeError::InvalidResponse("reply has no candidate text".into()))?;

        debug!(model = %self.model, chars = text.len(), "model replied");
        Ok(text)
    }
}

pub fn classify_status(status: StatusCode, body: String) -> PostforgeError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 300));
    match status.as_u16() {
        401 | 403 => PostforgeError::AuthenticationFailure(detail),
        429 => PostforgeError::RateLimited(detail),
        503 => PostforgeError::UpstreamOverloaded(detail),
        408 | 504 => PostforgeError::Timeout(detail),
        500..=599 => PostforgeError::UpstreamServerError(detail),
        _ => PostforgeError::InputMalformed(format!("request rejected, {detail}")),
    }
}

fn classify_transport(err: reqwest::Error) -> PostforgeError {
    if err.is_timeout() {
        PostforgeError::Timeout(err.to_string())
    } else if err.is_decode() {
        PostforgeError::InvalidResponse(err.to_string())
    } else {
        PostforgeError::Network(err.to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// What the model produced for one platform.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    pub content: Value,
    pub quality_score: u8,
}

/// Extracts `{"content": ..., "quality_score": n}` from a model reply,
/// tolerating a surrounding markdown code fence.
pub fn parse_reply(reply: &str) -> Result<GeneratedContent> {
    let body = strip_code_fence(reply);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PostforgeError::InvalidResponse(format!("reply is not JSON: {e}")))?;

    let content = value
        .get("content")
        .filter(|c| c.is_object())
        .cloned()
        .ok_or_else(|| PostforgeError::InvalidResponse("reply lacks a `content` object".into()))?;
    let quality_score = value
        .get("quality_score")
        .and_then(Value::as_u64)
        .filter(|score| *score <= 100)
        .ok_or_else(|| {
            PostforgeError::InvalidResponse("reply lacks a `quality_score` in 0..=100".into())
        })?;

    Ok(GeneratedContent {
        content,
        quality_score: quality_score as u8,
    })
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    match rest.split_once('\n') {
        // drop the info string (e.g. `json`) on the opening line
        Some((info, body)) if !info.trim_start().starts_with(['{', '[']) => body.trim(),
        // single-line fence, or a body that starts right after the backticks
        _ => rest.trim_start_matches("json").trim(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    candidate_count: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_classification() {
        let kind = |code: u16| {
            classify_status(StatusCode::from_u16(code).unwrap(), String::new()).kind()
        };
        assert_eq!(kind(401), "AuthenticationFailure");
        assert_eq!(kind(403), "AuthenticationFailure");
        assert_eq!(kind(429), "RateLimited");
        assert_eq!(kind(503), "UpstreamOverloaded");
        assert_eq!(kind(504), "Timeout");
        assert_eq!(kind(500), "UpstreamServerError");
        assert_eq!(kind(502), "UpstreamServerError");
        assert_eq!(kind(400), "InputMalformed");
        assert_eq!(kind(404), "InputMalformed");
    }

    #[test]
    fn rate_limit_is_retryable_but_bad_request_is_not() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, String::new()).is_retryable());
    }

    #[test]
    fn request_body_uses_gemini_field_names() {
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: "hi".into() }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.5,
                candidate_count: 1,
                max_output_tokens: 2048,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(value["generationConfig"]["candidateCount"], 1);
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn parses_fenced_reply() {
        let reply = "```json\n{\"content\": {\"title\": \"Hi\"}, \"quality_score\": 87}\n```";
        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.content, json!({"title": "Hi"}));
        assert_eq!(parsed.quality_score, 87);
    }

    #[test]
    fn parses_single_line_fence() {
        for reply in [
            r#"```{"content":{},"quality_score":1}```"#,
            r#"```json {"content":{},"quality_score":1}```"#,
            "```{\"content\":{},\n\"quality_score\":1}\n```",
        ] {
            let parsed = parse_reply(reply).unwrap();
            assert_eq!(parsed.quality_score, 1, "{reply}");
        }
    }

    #[test]
    fn rejects_unusable_replies() {
        for reply in [
            "Sure! Here is your post.",
            r#"{"content": "plain string", "quality_score": 50}"#,
            r#"{"content": {}, "quality_score": 150}"#,
            r#"{"content": {}}"#,
        ] {
            let err = parse_reply(reply).unwrap_err();
            assert!(matches!(err, PostforgeError::InvalidResponse(_)), "{reply}");
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
