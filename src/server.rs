use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{ModelRegistry, NlpRequest, Priority, TaskType},
    pipeline::{EndpointLimits, MetricsSnapshot, TaskRouter},
};

const API_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
    pub tasks: Arc<TaskRouter>,
}

pub fn build_router(
    config: Arc<AppConfig>,
    registry: Arc<ModelRegistry>,
    tasks: Arc<TaskRouter>,
) -> Router {
    let state = AppState {
        config,
        registry,
        tasks,
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/generate", post(generate))
        .route("/question-answering", post(answer_question))
        .route("/summarize", post(summarize))
        .route("/translate", post(translate))
        .route("/classify", post(classify))
        .route("/batch", post(batch))
        .route("/ner", post(ner))
        .route("/chat", post(chat))
        .route("/metrics", get(metrics))
        .route("/cache/clear", post(clear_cache))
        .route("/models", get(list_models))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// JSON body extractor whose rejections use the service error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ServiceError))]
struct ApiJson<T>(T);

fn priority(raw: Option<&Value>) -> Result<Priority, ServiceError> {
    match raw {
        None | Some(Value::Null) => Ok(Priority::default()),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| ServiceError::Validation("priority must be an integer".into()))
            .and_then(Priority::new),
    }
}

async fn respond(state: &AppState, request: NlpRequest) -> Result<Json<Value>, ServiceError> {
    let response = state.tasks.run(&request).await?;
    Ok(Json(response.envelope()))
}

async fn respond_within(
    state: &AppState,
    request: NlpRequest,
    limits: &EndpointLimits,
) -> Result<Json<Value>, ServiceError> {
    limits.check(request.parameters())?;
    respond(state, request).await
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "NLP gateway",
        "version": API_VERSION,
        "health": "/health",
    }))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (code, body) = backend_health(&state).await;
    (code, Json(body))
}

async fn backend_health(state: &AppState) -> (StatusCode, Value) {
    match state.registry.health().await {
        Ok(()) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "backend": state.registry.backend_name(),
                "timestamp": Utc::now().to_rfc3339(),
            }),
        ),
        Err(err) => {
            warn!(error = %err, "backend health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "status": "unhealthy",
                    "error": err.to_string(),
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
        }
    }
}

async fn status(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (code, health) = backend_health(&state).await;
    let body = json!({
        "system_health": health,
        "performance_metrics": state.tasks.metrics().snapshot(),
        "api_version": API_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
        "environment": {
            "backend": format!("{:?}", state.config.backend).to_lowercase(),
            "model_backend_url": state.config.model_backend_url,
            "model": state.config.model_id,
            "batch_concurrency": state.config.batch_concurrency,
        },
    });
    (code, Json(body))
}

#[derive(Deserialize)]
struct GenerateBody {
    #[serde(default)]
    text: String,
    max_tokens: Option<Value>,
    temperature: Option<Value>,
    top_p: Option<Value>,
    top_k: Option<Value>,
    repetition_penalty: Option<Value>,
    do_sample: Option<Value>,
    timeout_seconds: Option<Value>,
    priority: Option<Value>,
    #[serde(default)]
    history: Vec<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

async fn generate(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<GenerateBody>,
) -> Result<Json<Value>, ServiceError> {
    let request = NlpRequest::new(TaskType::Generation, body.text)?
        .with_history(body.history)
        .with_parameter("max_new_tokens", body.max_tokens)
        .with_parameter("temperature", body.temperature)
        .with_parameter("top_p", body.top_p)
        .with_parameter("top_k", body.top_k)
        .with_parameter("repetition_penalty", body.repetition_penalty)
        .with_parameter("do_sample", body.do_sample)
        .with_parameter("timeout_seconds", body.timeout_seconds)
        .with_metadata(body.metadata)
        .with_priority(priority(body.priority.as_ref())?);
    respond(&state, request).await
}

#[derive(Deserialize)]
struct QuestionBody {
    #[serde(default)]
    question: String,
    context: Option<String>,
    max_tokens: Option<Value>,
    temperature: Option<Value>,
}

async fn answer_question(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<QuestionBody>,
) -> Result<Json<Value>, ServiceError> {
    let request = NlpRequest::new(TaskType::QuestionAnswering, body.question)?
        .with_context(body.context)
        .with_parameter("max_new_tokens", body.max_tokens)
        .with_parameter("temperature", body.temperature);
    respond_within(&state, request, &EndpointLimits::QUESTION_ANSWERING).await
}

#[derive(Deserialize)]
struct SummarizeBody {
    #[serde(default)]
    text: String,
    max_length: Option<Value>,
    temperature: Option<Value>,
}

async fn summarize(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SummarizeBody>,
) -> Result<Json<Value>, ServiceError> {
    let request = NlpRequest::new(TaskType::Summarization, body.text)?
        .with_parameter("max_new_tokens", body.max_length)
        .with_parameter("temperature", body.temperature);
    respond_within(&state, request, &EndpointLimits::SUMMARIZATION).await
}

#[derive(Deserialize)]
struct TranslateBody {
    #[serde(default)]
    text: String,
    target_language: Option<String>,
    max_tokens: Option<Value>,
}

async fn translate(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<TranslateBody>,
) -> Result<Json<Value>, ServiceError> {
    let request = NlpRequest::new(TaskType::Translation, body.text)?
        .with_target_language(body.target_language)
        .with_parameter("max_new_tokens", body.max_tokens);
    respond_within(&state, request, &EndpointLimits::TRANSLATION).await
}

#[derive(Deserialize)]
struct ClassifyBody {
    #[serde(default)]
    text: String,
    categories: Option<Vec<String>>,
    max_tokens: Option<Value>,
}

async fn classify(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ClassifyBody>,
) -> Result<Json<Value>, ServiceError> {
    let request = NlpRequest::new(TaskType::Classification, body.text)?
        .with_categories(body.categories)
        .with_parameter("max_new_tokens", body.max_tokens);
    respond_within(&state, request, &EndpointLimits::CLASSIFICATION).await
}

#[derive(Deserialize)]
struct BatchBody {
    #[serde(default)]
    requests: Vec<Value>,
    priority: Option<Value>,
}

async fn batch(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<BatchBody>,
) -> Result<Json<Vec<Value>>, ServiceError> {
    let priority = priority(body.priority.as_ref())?;
    let responses = state.tasks.process_batch(&body.requests, priority).await;
    Ok(Json(responses.iter().map(|r| r.envelope()).collect()))
}

#[derive(Deserialize)]
struct NerBody {
    #[serde(default)]
    text: String,
}

async fn ner(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NerBody>,
) -> Result<Json<Value>, ServiceError> {
    respond(&state, NlpRequest::new(TaskType::Ner, body.text)?).await
}

#[derive(Deserialize)]
struct ChatBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    history: Vec<String>,
}

async fn chat(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ChatBody>,
) -> Result<Json<Value>, ServiceError> {
    let request = NlpRequest::new(TaskType::Chat, body.message)?.with_history(body.history);
    respond(&state, request).await
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.tasks.metrics().snapshot())
}

async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    let removed = state.tasks.cache().clear();
    info!(removed, "response cache cleared");
    Json(json!({
        "message": "cache cleared",
        "entries_removed": removed,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn list_models(State(state): State<AppState>) -> Json<Value> {
    match state.registry.list_models().await {
        Ok(models) => Json(json!({ "models": models })),
        Err(err) => {
            warn!(error = %err, "model listing failed");
            Json(json!({ "models": [], "error": err.to_string() }))
        }
    }
}
