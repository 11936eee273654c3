//! Chat-completion client abstraction.
//!
//! Defines the [`ChatModel`] trait and its implementations:
//! - **[`DisabledChat`]**: fails every call; used when `[llm].provider` is
//!   `disabled` or the API key is missing.
//! - **[`OpenAiChat`]**: any OpenAI-compatible `/chat/completions` endpoint
//!   (OpenAI, xAI), with strict JSON-schema response formats.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped at 32s)
//! - Other HTTP 4xx → fail immediately
//! - Network errors → retry

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;

/// Strict JSON schema attached to a request as
/// `response_format: {"type": "json_schema", ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub schema: Option<JsonSchemaFormat>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// `choices[0].message.content`.
    pub content: String,
    /// Full response body as returned by the API.
    pub raw: String,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM is not available: {0}")]
    Disabled(String),
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("LLM request failed: {0}")]
    Network(String),
    #[error("no content in LLM response")]
    EmptyResponse,
    #[error("LLM returned invalid JSON: {0}")]
    InvalidJson(String),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

pub struct DisabledChat {
    reason: String,
}

impl DisabledChat {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
        Err(LlmError::Disabled(self.reason.clone()))
    }
}

pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    fn body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });
        if let Some(ref schema) = request.schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": schema,
            });
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = self.body(&request);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let response = match resp {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(LlmError::Network(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(t) => t,
                Err(e) => {
                    last_err = Some(LlmError::Network(e.to_string()));
                    continue;
                }
            };

            if status.is_success() {
                return parse_chat_response(&text);
            }

            let err = LlmError::Api {
                status: status.as_u16(),
                body: text,
            };
            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!(status = status.as_u16(), model = %self.model, "chat completion failed, will retry");
                last_err = Some(err);
                continue;
            }
            return Err(err);
        }

        Err(last_err.unwrap_or_else(|| LlmError::Network("no attempts made".to_string())))
    }
}

/// Pulls `choices[0].message.content` out of a completion body.
fn parse_chat_response(raw: &str) -> Result<ChatResponse, LlmError> {
    let json: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| LlmError::InvalidJson(e.to_string()))?;
    let content = match &json["choices"][0]["message"]["content"] {
        serde_json::Value::String(s) if !s.is_empty() => s.clone(),
        serde_json::Value::Null => return Err(LlmError::EmptyResponse),
        serde_json::Value::String(_) => return Err(LlmError::EmptyResponse),
        other => other.to_string(),
    };
    Ok(ChatResponse {
        content,
        raw: raw.to_string(),
    })
}

/// Parses model output as JSON. Falls back to the outermost `{...}`
/// substring for replies wrapped in prose or code fences.
pub fn parse_json_content(content: &str) -> Result<serde_json::Value, LlmError> {
    match serde_json::from_str(content.trim()) {
        Ok(v) => Ok(v),
        Err(first) => {
            let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) else {
                return Err(LlmError::InvalidJson(first.to_string()));
            };
            if end <= start {
                return Err(LlmError::InvalidJson(first.to_string()));
            }
            serde_json::from_str(&content[start..=end])
                .map_err(|e| LlmError::InvalidJson(e.to_string()))
        }
    }
}

/// Builds the model for a config section. A missing API key yields a
/// [`DisabledChat`] explaining why, so the server can still start.
pub fn create_model(config: &LlmConfig) -> Arc<dyn ChatModel> {
    if !config.is_enabled() {
        return Arc::new(DisabledChat::new("provider is disabled in config"));
    }
    match OpenAiChat::new(config) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            tracing::warn!(error = %e, base_url = %config.base_url, "LLM client unavailable");
            Arc::new(DisabledChat::new(e.to_string()))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Router};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned completions and records every request.
    pub struct ScriptedChat {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChat {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(content: &str) -> Self {
            Self::new(vec![Ok(content.to_string())])
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse));
            next.map(|content| ChatResponse {
                raw: serde_json::json!({"choices":[{"message":{"content": content}}]}).to_string(),
                content,
            })
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            system: "sys".into(),
            user: "hi".into(),
            schema: None,
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(base_url: String) -> LlmConfig {
        LlmConfig {
            provider: "openai".into(),
            base_url,
            max_retries: 0,
            ..LlmConfig::default()
        }
    }

    #[test]
    fn json_fallback_uses_outermost_braces() {
        let v = parse_json_content("Sure! ```json\n{\"urls\": [\"https://a\"]}\n```").unwrap();
        assert_eq!(v["urls"][0], "https://a");
        assert!(parse_json_content("no json here").is_err());
        assert!(parse_json_content("} {").is_err());
    }

    #[test]
    fn completion_body_parsing() {
        let r = parse_chat_response(r#"{"choices":[{"message":{"content":"{\"a\":1}"}}]}"#).unwrap();
        assert_eq!(r.content, "{\"a\":1}");
        assert!(matches!(
            parse_chat_response(r#"{"choices":[]}"#),
            Err(LlmError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn disabled_model_errors() {
        let m = create_model(&LlmConfig::default());
        assert_eq!(m.model_name(), "disabled");
        assert!(matches!(m.complete(request()).await, Err(LlmError::Disabled(_))));
    }

    #[tokio::test]
    async fn posts_schema_and_reads_content() {
        let base = serve(Router::new().route(
            "/v1/chat/completions",
            post(|body: axum::Json<serde_json::Value>| async move {
                let echoed = body.0["response_format"]["json_schema"]["name"].clone();
                axum::Json(serde_json::json!({
                    "choices": [{"message": {"content": echoed.to_string()}}]
                }))
            }),
        ))
        .await;

        let chat = OpenAiChat::with_api_key(&config(format!("{}/v1/", base)), "k".into()).unwrap();
        let mut req = request();
        req.schema = Some(JsonSchemaFormat {
            name: "probe".into(),
            strict: true,
            schema: serde_json::json!({"type": "object"}),
        });
        let resp = chat.complete(req).await.unwrap();
        assert_eq!(resp.content, "\"probe\"");
        assert!(resp.raw.contains("choices"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let base = serve(Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::BAD_REQUEST, "bad schema") }),
        ))
        .await;
        let mut cfg = config(base);
        cfg.max_retries = 3;
        let chat = OpenAiChat::with_api_key(&cfg, "k".into()).unwrap();

        let start = std::time::Instant::now();
        let err = chat.complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 400, .. }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
