//! HTTP clients for the model-serving, chat-completion and entity backends.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    error::ServiceError,
    model::{
        backend::{ChatBackend, Completion, EntityBackend, GenerationBackend},
        tokenizer::EncodedPrompt,
    },
    pipeline::{ChatTurn, GenerationParameters},
};

/// Non-2xx replies count as the backend being unavailable.
async fn ensure_success(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::BackendUnavailable(format!(
        "backend returned {status}: {body}"
    )))
}

/// Greedy decoding is expressed as temperature 0 on OpenAI-compatible servers.
fn wire_temperature(params: &GenerationParameters) -> f64 {
    if params.do_sample {
        params.temperature
    } else {
        0.0
    }
}

#[derive(Serialize)]
struct CompletionPayload<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    top_k: u32,
    repetition_penalty: f64,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionReply {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

/// OpenAI-compatible `/v1/completions` server.
pub struct CompletionClient {
    http: Client,
    base_url: String,
    management_url: String,
    model: String,
}

impl CompletionClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        management_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            management_url: management_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl GenerationBackend for CompletionClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &EncodedPrompt,
        params: &GenerationParameters,
    ) -> Result<Completion, ServiceError> {
        let payload = CompletionPayload {
            model: &self.model,
            prompt: &prompt.text,
            max_tokens: params.max_new_tokens,
            temperature: wire_temperature(params),
            top_p: params.top_p,
            top_k: params.top_k,
            repetition_penalty: params.repetition_penalty,
            stream: false,
        };
        debug!(url = %self.base_url, tokens = prompt.token_count, "posting completion");

        let response = self
            .http
            .post(format!("{}/v1/completions", self.base_url))
            .json(&payload)
            .send()
            .await?;
        let reply: CompletionReply = ensure_success(response).await?.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .map(|choice| Completion::Text(choice.text))
            .ok_or_else(|| ServiceError::Generation("backend returned no choices".into()))
    }

    async fn health(&self) -> Result<(), ServiceError> {
        let response = self
            .http
            .get(format!("{}/models", self.management_url))
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    async fn list_models(&self) -> Result<Value, ServiceError> {
        let response = self
            .http
            .get(format!("{}/models", self.management_url))
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatReply {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatTurn,
}

/// OpenAI-compatible `/v1/chat/completions` server.
pub struct ChatClient {
    http: Client,
    base_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(http: Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn chat(
        &self,
        turns: &[ChatTurn],
        params: &GenerationParameters,
    ) -> Result<String, ServiceError> {
        let payload = ChatPayload {
            model: &self.model,
            messages: turns,
            max_tokens: params.max_new_tokens,
            temperature: wire_temperature(params),
            top_p: params.top_p,
            stream: false,
        };
        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&payload)
            .send()
            .await?;
        let reply: ChatReply = ensure_success(response).await?.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::Generation("chat backend returned no choices".into()))
    }
}

/// Model-server prediction endpoint for entity extraction; takes the raw text
/// as the request body.
pub struct EntityClient {
    http: Client,
    endpoint: String,
}

impl EntityClient {
    pub fn new(http: Client, base_url: &str, model: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/predictions/{model}", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl EntityBackend for EntityClient {
    async fn extract(&self, text: &str) -> Result<Value, ServiceError> {
        let response = self
            .http
            .post(&self.endpoint)
            .body(text.to_string())
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}
