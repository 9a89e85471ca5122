//! In-process TorchScript causal language model.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::thread_rng;
use serde_json::{Value, json};
use tch::{Device, Kind, Tensor, no_grad};
use tokio::task;
use tracing::info;

use crate::{
    error::ServiceError,
    model::{
        backend::{Completion, GenerationBackend},
        sampling::{apply_repetition_penalty, sample_token},
        tokenizer::EncodedPrompt,
    },
    pipeline::GenerationParameters,
};

pub struct ModelInstance {
    name: String,
    device: Device,
    eos_token_id: Option<u32>,
    module: Mutex<tch::CModule>,
}

impl ModelInstance {
    pub fn load(
        name: &str,
        module_path: &Path,
        device: Device,
        eos_token_id: Option<u32>,
    ) -> Result<Self, ServiceError> {
        if !module_path.exists() {
            return Err(ServiceError::BackendUnavailable(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }
        let mut module = tch::CModule::load_on_device(module_path, device)
            .map_err(|e| ServiceError::BackendUnavailable(e.to_string()))?;
        module.set_eval();
        info!(model = name, path = %module_path.display(), "loaded TorchScript module");

        Ok(Self {
            name: name.to_string(),
            device,
            eos_token_id,
            module: Mutex::new(module),
        })
    }

    /// Autoregressive loop over the traced forward pass. Returns the prompt
    /// ids followed by the generated ones.
    pub fn generate_ids(
        &self,
        prompt_ids: &[u32],
        params: &GenerationParameters,
    ) -> Result<Vec<u32>, ServiceError> {
        let mut sequence: Vec<u32> = prompt_ids.to_vec();
        if sequence.is_empty() {
            return Err(ServiceError::Generation("prompt encoded to zero tokens".into()));
        }
        let mut rng = thread_rng();

        no_grad(|| {
            let module = self.module.lock();

            for _ in 0..params.max_new_tokens {
                let ids: Vec<i64> = sequence.iter().map(|&id| id as i64).collect();
                let input_tensor = Tensor::from_slice(&ids)
                    .reshape([1, ids.len() as i64])
                    .to(self.device);

                // Traced models return either the logits or a (logits, past) tuple.
                let output = module
                    .forward_is(&[tch::IValue::Tensor(input_tensor)])
                    .map_err(|e| ServiceError::Generation(e.to_string()))?;
                let logits = match output {
                    tch::IValue::Tensor(t) => t,
                    tch::IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                        tch::IValue::Tensor(t) => t.shallow_clone(),
                        _ => {
                            return Err(ServiceError::Generation(
                                "expected tensor as first tuple element".into(),
                            ));
                        }
                    },
                    _ => {
                        return Err(ServiceError::Generation(
                            "unexpected model output format".into(),
                        ));
                    }
                };

                // [1, seq_len, vocab] -> [vocab]
                let last_logits = logits.select(1, -1).squeeze().to_kind(Kind::Float);
                let mut row = Vec::<f32>::try_from(&last_logits)
                    .map_err(|e| ServiceError::Generation(e.to_string()))?;
                apply_repetition_penalty(&mut row, &sequence, params.repetition_penalty as f32);

                let next = sample_token(&row, params, &mut rng);
                sequence.push(next);
                if Some(next) == self.eos_token_id {
                    break;
                }
            }

            Ok::<(), ServiceError>(())
        })?;

        Ok(sequence)
    }
}

/// [`GenerationBackend`] running a [`ModelInstance`] on the blocking pool.
pub struct LocalBackend {
    model: Arc<ModelInstance>,
}

impl LocalBackend {
    pub fn new(model: ModelInstance) -> Self {
        Self {
            model: Arc::new(model),
        }
    }
}

#[async_trait]
impl GenerationBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.model.name
    }

    async fn generate(
        &self,
        prompt: &EncodedPrompt,
        params: &GenerationParameters,
    ) -> Result<Completion, ServiceError> {
        let ids = prompt.ids.clone().ok_or_else(|| {
            ServiceError::Generation("local backend needs a vocabulary tokenizer".into())
        })?;
        let model = self.model.clone();
        let params = *params;

        task::spawn_blocking(move || model.generate_ids(&ids, &params))
            .await
            .map_err(|err| ServiceError::Generation(format!("inference task failed: {err}")))?
            .map(Completion::Tokens)
    }

    async fn health(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn list_models(&self) -> Result<Value, ServiceError> {
        Ok(json!([{ "modelName": self.model.name, "backend": "torchscript" }]))
    }
}

pub fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            return Device::Cuda(idx);
        }
    }
    Device::Cpu
}
