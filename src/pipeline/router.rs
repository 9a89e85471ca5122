use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use futures::{StreamExt, stream};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        EntityBackend, ModelRegistry, NlpRequest, NlpResponse, Priority, ResponseMetadata,
        TaskOutput, TaskType,
    },
    pipeline::{
        GenerationMetrics, GenerationParameters, InferenceExecutor, ParameterResolver,
        PipelineMetrics,
        cache::{CachedGeneration, ResponseCache},
        decode::decode_continuation,
        prompt,
    },
};

/// Knobs the router needs from process configuration.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub model_name: String,
    pub model_version: String,
    pub defaults: GenerationParameters,
    pub max_context_length: usize,
    pub cache_capacity: usize,
    pub batch_concurrency: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            model_name: "mistral-7b-instruct".into(),
            model_version: "1.0".into(),
            defaults: GenerationParameters::default(),
            max_context_length: 4096,
            cache_capacity: 256,
            batch_concurrency: 4,
        }
    }
}

impl From<&AppConfig> for RouterSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            model_name: config.model_id.clone(),
            model_version: config.model_version.clone(),
            defaults: config.generation_defaults,
            max_context_length: config.max_context_length,
            cache_capacity: config.cache_capacity,
            batch_concurrency: config.batch_concurrency,
        }
    }
}

struct Generated {
    text: String,
    metrics: GenerationMetrics,
    cached: bool,
}

/// Dispatches task-typed requests through prompt building, parameter
/// resolution, inference, decoding and metrics, and assembles the
/// task-specific response. Every failure comes back as a value.
pub struct TaskRouter {
    resolver: ParameterResolver,
    executor: InferenceExecutor,
    entities: Arc<dyn EntityBackend>,
    cache: ResponseCache,
    metrics: Arc<PipelineMetrics>,
    model_name: String,
    model_version: String,
    batch_concurrency: usize,
}

impl TaskRouter {
    pub fn new(registry: &ModelRegistry, settings: RouterSettings) -> Result<Self, ServiceError> {
        Ok(Self {
            resolver: ParameterResolver::new(settings.defaults)?,
            executor: InferenceExecutor::new(
                registry.generation(),
                registry.chat(),
                registry.tokenizer(),
                settings.max_context_length,
            ),
            entities: registry.entities(),
            cache: ResponseCache::new(settings.cache_capacity),
            metrics: Arc::new(PipelineMetrics::new()),
            model_name: settings.model_name,
            model_version: settings.model_version,
            batch_concurrency: settings.batch_concurrency.max(1),
        })
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Runs one request and hands failures back to the caller, which maps
    /// them to a status code.
    pub async fn run(&self, request: &NlpRequest) -> Result<NlpResponse, ServiceError> {
        self.handle(Uuid::new_v4(), Instant::now(), request).await
    }

    /// Runs one request and folds any failure into an error-status response.
    pub async fn process(&self, request: &NlpRequest) -> NlpResponse {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        match self.handle(request_id, started, request).await {
            Ok(response) => response,
            Err(err) => NlpResponse::failure(
                request_id,
                request.task_type(),
                &err,
                started.elapsed().as_secs_f64(),
            ),
        }
    }

    /// Runs every item independently. `responses[i]` answers `items[i]`; an
    /// item that fails, even at parse time, yields an error entry in its slot.
    pub async fn process_batch(&self, items: &[Value], priority: Priority) -> Vec<NlpResponse> {
        self.metrics.record_batch();
        info!(items = items.len(), "processing batch");

        stream::iter(items.iter().cloned())
            .map(|item| async move { self.process_item(&item, priority).await })
            .buffered(self.batch_concurrency)
            .collect()
            .await
    }

    async fn process_item(&self, item: &Value, priority: Priority) -> NlpResponse {
        match NlpRequest::from_batch_item(item, priority) {
            Ok(request) => self.process(&request).await,
            Err(err) => {
                let task = item
                    .get("task_type")
                    .and_then(|raw| serde_json::from_value(raw.clone()).ok())
                    .unwrap_or(TaskType::Generation);
                self.metrics.record_request(task);
                self.metrics.record_failure();
                warn!(error = %err, "rejected batch item");
                NlpResponse::failure(Uuid::new_v4(), task, &err, 0.0)
            }
        }
    }

    async fn handle(
        &self,
        request_id: Uuid,
        started: Instant,
        request: &NlpRequest,
    ) -> Result<NlpResponse, ServiceError> {
        let task = request.task_type();
        self.metrics.record_request(task);

        match self.dispatch(request).await {
            Ok((output, metadata)) => {
                self.metrics.record_success();
                let processing_time = started.elapsed().as_secs_f64();
                info!(%request_id, %task, processing_time, "request completed");
                Ok(NlpResponse::success(
                    request_id,
                    task,
                    output,
                    metadata,
                    processing_time,
                ))
            }
            Err(err) => {
                self.metrics.record_failure();
                warn!(%request_id, %task, error = %err, "request failed");
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        request: &NlpRequest,
    ) -> Result<(TaskOutput, ResponseMetadata), ServiceError> {
        let task = request.task_type();
        if task == TaskType::Ner {
            let entities = self.entities.extract(request.text()).await?;
            return Ok((TaskOutput::Ner { entities }, self.metadata(request, None, None, false)));
        }

        let params = self.resolver.resolve(task, request.parameters())?;
        let timeout = request_timeout(request.parameters())?;
        let prompt = prompt::build_prompt(request);

        let generated = if task == TaskType::Chat {
            self.chat(request, &prompt, &params, timeout).await?
        } else {
            self.generate(task, &prompt, &params, timeout).await?
        };

        let metadata = self.metadata(
            request,
            Some(params),
            Some(generated.metrics),
            generated.cached,
        );
        Ok((task_output(request, generated.text), metadata))
    }

    async fn generate(
        &self,
        task: TaskType,
        prompt: &str,
        params: &GenerationParameters,
        timeout: Option<Duration>,
    ) -> Result<Generated, ServiceError> {
        let key = self.cache.key(task, prompt, params);
        if let Some(hit) = key.as_deref().and_then(|k| self.cache.get(k)) {
            self.metrics.record_cache_hit();
            // Replayed entries carry token counts but no timing.
            return Ok(Generated {
                text: hit.text,
                metrics: GenerationMetrics::compute(
                    0.0,
                    hit.metrics.input_token_count,
                    hit.metrics.output_token_count,
                ),
                cached: true,
            });
        }

        let raw = self.executor.execute(prompt, params, timeout).await?;
        let text = decode_continuation(self.executor.tokenizer(), &raw.continuation)?;
        let metrics = GenerationMetrics::compute(
            raw.inference_time.as_secs_f64(),
            raw.input_token_count,
            raw.output_token_count,
        );
        self.metrics.record_generation(&metrics);

        if let Some(key) = key {
            self.cache.insert(
                key,
                CachedGeneration {
                    text: text.clone(),
                    metrics: metrics.clone(),
                },
            );
        }
        Ok(Generated {
            text,
            metrics,
            cached: false,
        })
    }

    async fn chat(
        &self,
        request: &NlpRequest,
        rendered: &str,
        params: &GenerationParameters,
        timeout: Option<Duration>,
    ) -> Result<Generated, ServiceError> {
        let turns = prompt::chat_turns(request.history(), request.text());
        let raw = self
            .executor
            .execute_chat(&turns, rendered, params, timeout)
            .await?;
        let text = decode_continuation(self.executor.tokenizer(), &raw.continuation)?;
        let metrics = GenerationMetrics::compute(
            raw.inference_time.as_secs_f64(),
            raw.input_token_count,
            raw.output_token_count,
        );
        self.metrics.record_generation(&metrics);
        Ok(Generated {
            text,
            metrics,
            cached: false,
        })
    }

    fn metadata(
        &self,
        request: &NlpRequest,
        parameters: Option<GenerationParameters>,
        metrics: Option<GenerationMetrics>,
        cached: bool,
    ) -> ResponseMetadata {
        ResponseMetadata {
            model: self.model_name.clone(),
            version: self.model_version.clone(),
            timestamp: Utc::now(),
            parameters,
            metrics,
            priority: request.priority(),
            cached,
            request: request.metadata().clone(),
        }
    }
}

fn task_output(request: &NlpRequest, text: String) -> TaskOutput {
    match request.task_type() {
        TaskType::Generation => TaskOutput::Generation {
            generated_text: text,
        },
        TaskType::QuestionAnswering => TaskOutput::QuestionAnswering { answer: text },
        TaskType::Summarization => TaskOutput::Summarization { summary: text },
        TaskType::Translation => TaskOutput::Translation {
            translation: text,
            target_language: request
                .target_language()
                .unwrap_or(prompt::DEFAULT_TARGET_LANGUAGE)
                .to_string(),
        },
        TaskType::Classification => TaskOutput::Classification {
            classification: text,
            categories: request.categories().map(<[String]>::to_vec),
        },
        TaskType::Chat => TaskOutput::Chat { response: text },
        TaskType::Ner => TaskOutput::Ner {
            entities: Value::String(text),
        },
    }
}

/// Optional per-request bound on the backend wait, in seconds.
fn request_timeout(parameters: &Map<String, Value>) -> Result<Option<Duration>, ServiceError> {
    match parameters.get("timeout_seconds") {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => match raw.as_f64() {
            Some(secs) if secs > 0.0 && secs.is_finite() => Ok(Some(Duration::from_secs_f64(secs))),
            _ => Err(ServiceError::Validation(
                "timeout_seconds must be a positive number".into(),
            )),
        },
    }
}
