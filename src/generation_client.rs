use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::credentials::CredentialResolver;
use crate::pipeline::{GenerationBackend, GenerationCall, GenerationError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Request/response shape spoken by the generation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    /// `/v1/messages` with an `x-api-key` header.
    #[default]
    Anthropic,
    /// `/chat/completions` with a bearer token.
    Openai,
}

impl ApiStyle {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "anthropic" | "messages" => Some(ApiStyle::Anthropic),
            "openai" | "chat" | "chat_completions" => Some(ApiStyle::Openai),
            _ => None,
        }
    }
}

pub struct HttpGenerationBackend {
    client: reqwest::Client,
    endpoint: String,
    style: ApiStyle,
    credentials: CredentialResolver,
    api_key: OnceCell<String>,
}

impl HttpGenerationBackend {
    pub fn from_config(
        config: &GenerationConfig,
        credentials: CredentialResolver,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| format!("failed to build HTTP client: {}", err))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim().to_string(),
            style: config.api_style,
            credentials,
            api_key: OnceCell::new(),
        })
    }

    /// Uses `key` instead of consulting the credential sources.
    pub fn with_api_key(self, key: impl Into<String>) -> Self {
        Self {
            api_key: OnceCell::new_with(Some(key.into())),
            ..self
        }
    }

    async fn api_key(&self) -> Result<&str, GenerationError> {
        self.api_key
            .get_or_try_init(|| async {
                self.credentials
                    .resolve()
                    .await
                    .map(|credential| credential.key)
                    .map_err(|err| GenerationError::Credential(err.to_string()))
            })
            .await
            .map(String::as_str)
    }

    async fn send(&self, call: &GenerationCall, api_key: &str) -> Result<String, GenerationError> {
        let request = match self.style {
            ApiStyle::Anthropic => self
                .client
                .post(&self.endpoint)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&MessagesRequest {
                    model: &call.model,
                    max_tokens: call.params.max_tokens,
                    temperature: call.params.temperature,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: &call.prompt,
                    }],
                }),
            ApiStyle::Openai => self
                .client
                .post(&self.endpoint)
                .header(AUTHORIZATION, format!("Bearer {}", api_key))
                .json(&ChatRequest {
                    model: &call.model,
                    max_tokens: call.params.max_tokens,
                    temperature: call.params.temperature,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: &call.prompt,
                    }],
                }),
        };

        let response = request
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| {
                let detail = body.trim();
                if detail.is_empty() {
                    status.to_string()
                } else {
                    detail.chars().take(300).collect()
                }
            });
            return Err(GenerationError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|err| GenerationError::Decode(err.to_string()))?;
        if let Some(message) = value.get("error").and_then(|_| error_message(&body)) {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let text = extract_text(&value).ok_or(GenerationError::EmptyContent)?;
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyContent);
        }
        debug!(model = %call.model, chars = text.chars().count(), "generation response received");
        Ok(text)
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn prepare(&self) -> Result<(), GenerationError> {
        self.api_key().await.map(|_| ())
    }

    async fn generate(
        &self,
        call: &GenerationCall,
        cancel: CancellationToken,
    ) -> Result<String, GenerationError> {
        let api_key = self.api_key().await?;
        tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = self.send(call, api_key) => result,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Text from `content[0].text` (messages) or `choices[0].message.content` (chat).
pub fn extract_text(value: &Value) -> Option<String> {
    if let Some(blocks) = value.get("content").and_then(Value::as_array) {
        let text: String = blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();
        if !text.is_empty() {
            return Some(text);
        }
    }
    value
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// `error.message` from an error payload.
pub fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    match error {
        Value::String(message) => Some(message.clone()),
        _ => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
