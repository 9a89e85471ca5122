use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::{
    config::{AppConfig, BackendKind},
    error::ServiceError,
    model::{
        backend::{ChatBackend, EntityBackend, GenerationBackend},
        remote::{ChatClient, CompletionClient, EntityClient},
        tokenizer::{HfTokenizer, PromptTokenizer, WhitespaceTokenizer},
    },
};

/// Backends and tokenizer shared by every request. Built once at startup;
/// nothing here is mutated afterwards.
pub struct ModelRegistry {
    generation: Arc<dyn GenerationBackend>,
    chat: Arc<dyn ChatBackend>,
    entities: Arc<dyn EntityBackend>,
    tokenizer: Arc<dyn PromptTokenizer>,
}

impl ModelRegistry {
    pub fn initialize(config: &AppConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.backend_timeout)
            .build()
            .map_err(|e| ServiceError::BackendUnavailable(e.to_string()))?;

        let hf_tokenizer = match config.tokenizer_path.as_ref() {
            Some(path) => Some(Arc::new(HfTokenizer::from_file(path)?)),
            None => None,
        };
        let tokenizer: Arc<dyn PromptTokenizer> = match hf_tokenizer.clone() {
            Some(tokenizer) => tokenizer,
            None => {
                warn!("TOKENIZER_PATH not set; token counts are word-based approximations");
                Arc::new(WhitespaceTokenizer)
            }
        };

        let generation: Arc<dyn GenerationBackend> = match config.backend {
            BackendKind::Remote => Arc::new(CompletionClient::new(
                http.clone(),
                config.model_backend_url.as_str(),
                config.management_url.as_str(),
                config.model_id.as_str(),
            )),
            BackendKind::Local => local_backend(config, hf_tokenizer.as_deref())?,
        };
        info!(backend = generation.name(), kind = ?config.backend, "generation backend ready");

        let chat = Arc::new(ChatClient::new(
            http.clone(),
            config.chat_backend_url.as_str(),
            config.model_id.as_str(),
        ));
        let entities = Arc::new(EntityClient::new(
            http,
            &config.ner_backend_url,
            &config.ner_model,
        ));

        Ok(Self::from_parts(generation, chat, entities, tokenizer))
    }

    pub fn from_parts(
        generation: Arc<dyn GenerationBackend>,
        chat: Arc<dyn ChatBackend>,
        entities: Arc<dyn EntityBackend>,
        tokenizer: Arc<dyn PromptTokenizer>,
    ) -> Self {
        Self {
            generation,
            chat,
            entities,
            tokenizer,
        }
    }

    pub fn generation(&self) -> Arc<dyn GenerationBackend> {
        self.generation.clone()
    }

    pub fn chat(&self) -> Arc<dyn ChatBackend> {
        self.chat.clone()
    }

    pub fn entities(&self) -> Arc<dyn EntityBackend> {
        self.entities.clone()
    }

    pub fn tokenizer(&self) -> Arc<dyn PromptTokenizer> {
        self.tokenizer.clone()
    }

    pub fn backend_name(&self) -> &str {
        self.generation.name()
    }

    pub async fn health(&self) -> Result<(), ServiceError> {
        self.generation.health().await
    }

    pub async fn list_models(&self) -> Result<Value, ServiceError> {
        self.generation.list_models().await
    }
}

#[cfg(feature = "tch-backend")]
fn local_backend(
    config: &AppConfig,
    tokenizer: Option<&HfTokenizer>,
) -> Result<Arc<dyn GenerationBackend>, ServiceError> {
    use crate::model::loader::{LocalBackend, ModelInstance, parse_device};

    let tokenizer = tokenizer.ok_or_else(|| {
        ServiceError::Validation("MODEL_BACKEND=local requires TOKENIZER_PATH".into())
    })?;
    let eos = tokenizer.token_id(crate::pipeline::prompt::END_OF_SEQUENCE);
    let model = ModelInstance::load(
        &config.model_id,
        &config.module_path,
        parse_device(&config.device),
        eos,
    )?;
    Ok(Arc::new(LocalBackend::new(model)))
}

#[cfg(not(feature = "tch-backend"))]
fn local_backend(
    _config: &AppConfig,
    _tokenizer: Option<&HfTokenizer>,
) -> Result<Arc<dyn GenerationBackend>, ServiceError> {
    Err(ServiceError::Validation(
        "MODEL_BACKEND=local needs a build with the tch-backend feature".into(),
    ))
}
