use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::ServiceError,
    model::tokenizer::EncodedPrompt,
    pipeline::{ChatTurn, GenerationParameters},
};

/// What the model produced for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Full sequence as the model returned it; the prompt is echoed first.
    Tokens(Vec<u32>),
    /// Continuation text only.
    Text(String),
}

/// Text generation model, local or remote. Read-only once constructed.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &EncodedPrompt,
        params: &GenerationParameters,
    ) -> Result<Completion, ServiceError>;

    async fn health(&self) -> Result<(), ServiceError>;

    async fn list_models(&self) -> Result<Value, ServiceError>;
}

/// Chat-completion service fed with whole conversations.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        turns: &[ChatTurn],
        params: &GenerationParameters,
    ) -> Result<String, ServiceError>;
}

/// Named-entity extraction service; its output is opaque to the pipeline.
#[async_trait]
pub trait EntityBackend: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Value, ServiceError>;
}
