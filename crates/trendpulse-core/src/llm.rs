use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    SecretValue, TrendPulseError,
    config::{Config, LlmProvider},
};

const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_BASE: &str = "http://localhost:11434";

/// A single completion request. The image, when present, is sent alongside
/// the prompt to multimodal models.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub prompt: String,
    pub image: Option<Vec<u8>>,
}

impl LlmRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String>;
}

pub type DynLanguageModel = Arc<dyn LanguageModel>;

/// Build the configured backend.
pub fn build_language_model(config: &Config) -> Result<DynLanguageModel, TrendPulseError> {
    let key = config.llm_api_key()?;
    let base_url = config.llm.base_url.clone();
    let timeout = config.llm.timeout();
    let model: DynLanguageModel = match config.llm.provider {
        LlmProvider::OpenAi => {
            let key = key.ok_or_else(|| {
                TrendPulseError::MissingSecret(config.llm.api_key_env.clone())
            })?;
            Arc::new(OpenAiCompatibleModel::new(
                base_url.unwrap_or_else(|| OPENAI_DEFAULT_BASE.to_string()),
                config.llm.model.clone(),
                key,
                timeout,
            )?)
        }
        LlmProvider::Ollama => Arc::new(OllamaModel::new(
            base_url.unwrap_or_else(|| OLLAMA_DEFAULT_BASE.to_string()),
            config.llm.model.clone(),
            timeout,
        )?),
    };
    Ok(model)
}

fn http_client(timeout: Duration) -> Result<Client, TrendPulseError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| TrendPulseError::transport("llm", err.to_string()))
}

/// Chat-completions endpoint (`{base}/chat/completions`) with bearer auth.
pub struct OpenAiCompatibleModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretValue,
}

impl OpenAiCompatibleModel {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretValue,
        timeout: Duration,
    ) -> Result<Self, TrendPulseError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    fn request_body(&self, request: &LlmRequest) -> Value {
        let content = match &request.image {
            Some(bytes) => json!([
                { "type": "text", "text": request.prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes)) }
                }
            ]),
            None => json!(request.prompt),
        };
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "stream": false,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, request: LlmRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|err| TrendPulseError::transport("llm", err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TrendPulseError::transport("llm", err.to_string()))?;
        if !status.is_success() {
            return Err(map_http_error("llm", status, &body).into());
        }

        let value: Value = serde_json::from_str(&body).context("llm returned invalid JSON")?;
        parse_chat_response(&value).map_err(Into::into)
    }
}

/// Local Ollama server (`{base}/api/generate`, non-streaming).
pub struct OllamaModel {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaModel {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TrendPulseError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn request_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
        });
        if let Some(bytes) = &request.image {
            body["images"] = json!([STANDARD.encode(bytes)]);
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn complete(&self, request: LlmRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(url = %url, model = %self.model, "sending ollama generate request");

        let response = self
            .client
            .post(&url)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|err| TrendPulseError::transport("ollama", err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TrendPulseError::transport("ollama", err.to_string()))?;
        if !status.is_success() {
            return Err(map_http_error("ollama", status, &body).into());
        }

        let value: Value = serde_json::from_str(&body).context("ollama returned invalid JSON")?;
        parse_ollama_response(&value).map_err(Into::into)
    }
}

pub(crate) fn map_http_error(
    service: &'static str,
    status: reqwest::StatusCode,
    body: &str,
) -> TrendPulseError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    match status.as_u16() {
        401 | 403 => TrendPulseError::transport(service, format!("authentication failed ({status})")),
        429 => TrendPulseError::transport(service, format!("rate limited: {detail}")),
        _ => TrendPulseError::transport(service, format!("HTTP {status}: {detail}")),
    }
}

pub fn parse_chat_response(body: &Value) -> Result<String, TrendPulseError> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| TrendPulseError::transport("llm", "response has no message content"))?;
    Ok(strip_reasoning(content))
}

pub fn parse_ollama_response(body: &Value) -> Result<String, TrendPulseError> {
    let content = body
        .get("response")
        .and_then(Value::as_str)
        .ok_or_else(|| TrendPulseError::transport("ollama", "response has no `response` field"))?;
    Ok(strip_reasoning(content))
}

/// Drop a leading `<think>...</think>` section emitted by reasoning models.
pub fn strip_reasoning(content: &str) -> String {
    match content.rfind("</think>") {
        Some(idx) => content[idx + "</think>".len()..].trim().to_string(),
        None => content.trim().to_string(),
    }
}
