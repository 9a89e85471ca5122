use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    pipeline::{GenerationMetrics, GenerationParameters},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(alias = "text_generation")]
    Generation,
    QuestionAnswering,
    Summarization,
    Translation,
    Classification,
    Ner,
    Chat,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Generation,
        TaskType::QuestionAnswering,
        TaskType::Summarization,
        TaskType::Translation,
        TaskType::Classification,
        TaskType::Ner,
        TaskType::Chat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Generation => "generation",
            TaskType::QuestionAnswering => "question_answering",
            TaskType::Summarization => "summarization",
            TaskType::Translation => "translation",
            TaskType::Classification => "classification",
            TaskType::Ner => "ner",
            TaskType::Chat => "chat",
        }
    }

    /// Position in [`TaskType::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied priority, 1 (normal) to 3 (urgent). Recorded, never scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const NORMAL: Priority = Priority(1);

    pub fn new(value: i64) -> Result<Self, ServiceError> {
        if (1..=3).contains(&value) {
            Ok(Priority(value as u8))
        } else {
            Err(ServiceError::Validation(format!(
                "priority must be between 1 and 3, got {value}"
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

/// One task-typed request. Built once by the transport layer, then only read.
#[derive(Debug, Clone)]
pub struct NlpRequest {
    task_type: TaskType,
    text: String,
    context: Option<String>,
    history: Vec<String>,
    target_language: Option<String>,
    categories: Option<Vec<String>>,
    parameters: Map<String, Value>,
    metadata: Map<String, Value>,
    priority: Priority,
}

impl NlpRequest {
    pub fn new(task_type: TaskType, text: impl Into<String>) -> Result<Self, ServiceError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ServiceError::Validation("text must not be empty".into()));
        }
        Ok(Self {
            task_type,
            text,
            context: None,
            history: Vec::new(),
            target_language: None,
            categories: None,
            parameters: Map::new(),
            metadata: Map::new(),
            priority: Priority::default(),
        })
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    pub fn with_target_language(mut self, language: Option<String>) -> Self {
        self.target_language = language;
        self
    }

    pub fn with_categories(mut self, categories: Option<Vec<String>>) -> Self {
        self.categories = categories.filter(|c| !c.is_empty());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_parameter(mut self, key: &str, value: Option<impl Into<Value>>) -> Self {
        if let Some(value) = value {
            self.parameters.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Parses one element of a batch payload.
    ///
    /// `target_language` and `categories` may sit either at the top level of
    /// the item or inside its `parameters`.
    pub fn from_batch_item(item: &Value, priority: Priority) -> Result<Self, ServiceError> {
        let object = item
            .as_object()
            .ok_or_else(|| ServiceError::Validation("batch item must be a JSON object".into()))?;

        let task_type = match object.get("task_type") {
            None | Some(Value::Null) => TaskType::Generation,
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|_| ServiceError::Validation(format!("unknown task_type {raw}")))?,
        };

        let text = object
            .get("text")
            .or_else(|| object.get("question"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let parameters = optional_object(object, "parameters")?;
        let metadata = optional_object(object, "metadata")?;
        let lookup = |key: &str| object.get(key).or_else(|| parameters.get(key));

        let target_language = lookup("target_language")
            .and_then(Value::as_str)
            .map(str::to_string);
        let categories = match lookup("categories") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<Vec<String>>(raw.clone()).map_err(|_| {
                    ServiceError::Validation("categories must be a list of strings".into())
                })?,
            ),
        };
        let history = match object.get("history") {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value::<Vec<String>>(raw.clone()).map_err(|_| {
                ServiceError::Validation("history must be a list of strings".into())
            })?,
        };
        let context = object
            .get("context")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(NlpRequest::new(task_type, text)?
            .with_context(context)
            .with_history(history)
            .with_target_language(target_language)
            .with_categories(categories)
            .with_parameters(parameters)
            .with_metadata(metadata)
            .with_priority(priority))
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn target_language(&self) -> Option<&str> {
        self.target_language.as_deref()
    }

    pub fn categories(&self) -> Option<&[String]> {
        self.categories.as_deref()
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

fn optional_object(
    object: &Map<String, Value>,
    key: &str,
) -> Result<Map<String, Value>, ServiceError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(ServiceError::Validation(format!("{key} must be an object"))),
    }
}

/// Task-specific result, each variant carrying its own named field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskOutput {
    Generation {
        generated_text: String,
    },
    QuestionAnswering {
        answer: String,
    },
    Summarization {
        summary: String,
    },
    Translation {
        translation: String,
        target_language: String,
    },
    Classification {
        classification: String,
        categories: Option<Vec<String>>,
    },
    Chat {
        response: String,
    },
    Ner {
        entities: Value,
    },
}

impl TaskOutput {
    /// The generated text every generative variant wraps. Empty for NER.
    pub fn generated_text(&self) -> &str {
        match self {
            TaskOutput::Generation { generated_text } => generated_text,
            TaskOutput::QuestionAnswering { answer } => answer,
            TaskOutput::Summarization { summary } => summary,
            TaskOutput::Translation { translation, .. } => translation,
            TaskOutput::Classification { classification, .. } => classification,
            TaskOutput::Chat { response } => response,
            TaskOutput::Ner { .. } => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub model: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<GenerationParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<GenerationMetrics>,
    pub priority: Priority,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub request: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct NlpResponse {
    pub status: ResponseStatus,
    pub request_id: Uuid,
    pub task_type: TaskType,
    pub output: Option<TaskOutput>,
    pub metadata: Option<ResponseMetadata>,
    pub error: Option<String>,
    /// Seconds from admission to response assembly.
    pub processing_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl NlpResponse {
    pub fn success(
        request_id: Uuid,
        task_type: TaskType,
        output: TaskOutput,
        metadata: ResponseMetadata,
        processing_time: f64,
    ) -> Self {
        Self {
            status: ResponseStatus::Success,
            request_id,
            task_type,
            output: Some(output),
            metadata: Some(metadata),
            error: None,
            processing_time,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        request_id: Uuid,
        task_type: TaskType,
        error: &ServiceError,
        processing_time: f64,
    ) -> Self {
        Self {
            status: ResponseStatus::Error,
            request_id,
            task_type,
            output: None,
            metadata: None,
            error: Some(error.to_string()),
            processing_time,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn generated_text(&self) -> &str {
        self.output
            .as_ref()
            .map(TaskOutput::generated_text)
            .unwrap_or_default()
    }

    /// Wire form: `{status, data, request_id, processing_time, timestamp}` on
    /// success, `{status, error, request_id, timestamp}` on failure.
    pub fn envelope(&self) -> Value {
        match (&self.output, &self.error) {
            (Some(output), _) => {
                let mut data = match serde_json::to_value(output) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                data.insert("task_type".into(), Value::from(self.task_type.as_str()));
                if let Some(metadata) = &self.metadata {
                    data.insert(
                        "metadata".into(),
                        serde_json::to_value(metadata).unwrap_or(Value::Null),
                    );
                }
                serde_json::json!({
                    "status": self.status,
                    "data": data,
                    "request_id": self.request_id,
                    "processing_time": self.processing_time,
                    "timestamp": self.timestamp.to_rfc3339(),
                })
            }
            (None, error) => serde_json::json!({
                "status": ResponseStatus::Error,
                "error": error.as_deref().unwrap_or("unknown error"),
                "task_type": self.task_type,
                "request_id": self.request_id,
                "processing_time": self.processing_time,
                "timestamp": self.timestamp.to_rfc3339(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_rejected() {
        let err = NlpRequest::new(TaskType::Generation, "   ").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn priority_outside_range_is_rejected() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(4).is_err());
        assert_eq!(Priority::new(3).unwrap().value(), 3);
    }

    #[test]
    fn batch_item_reads_nested_task_fields() {
        let item = serde_json::json!({
            "text": "Bonjour",
            "task_type": "translation",
            "parameters": {"target_language": "English", "temperature": 0.4},
            "metadata": {"source": "unit"}
        });
        let request = NlpRequest::from_batch_item(&item, Priority::NORMAL).unwrap();
        assert_eq!(request.task_type(), TaskType::Translation);
        assert_eq!(request.target_language(), Some("English"));
        assert_eq!(request.metadata()["source"], "unit");
    }

    #[test]
    fn batch_item_accepts_legacy_task_name() {
        let item = serde_json::json!({"text": "hi", "task_type": "text_generation"});
        let request = NlpRequest::from_batch_item(&item, Priority::NORMAL).unwrap();
        assert_eq!(request.task_type(), TaskType::Generation);
    }

    #[test]
    fn batch_item_with_unknown_task_fails() {
        let item = serde_json::json!({"text": "hi", "task_type": "poetry"});
        assert!(NlpRequest::from_batch_item(&item, Priority::NORMAL).is_err());
    }

    #[test]
    fn task_index_matches_all_order() {
        for (idx, task) in TaskType::ALL.iter().enumerate() {
            assert_eq!(task.index(), idx);
        }
    }

    #[test]
    fn envelope_uses_task_field_name() {
        let response = NlpResponse::success(
            Uuid::new_v4(),
            TaskType::Summarization,
            TaskOutput::Summarization {
                summary: "short".into(),
            },
            ResponseMetadata {
                model: "m".into(),
                version: "1.0".into(),
                timestamp: Utc::now(),
                parameters: None,
                metrics: None,
                priority: Priority::NORMAL,
                cached: false,
                request: Map::new(),
            },
            0.5,
        );
        let body = response.envelope();
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["summary"], "short");
        assert_eq!(body["data"]["metadata"]["priority"], 1);
        assert!(body["data"]["metadata"].get("cached").is_none());
    }
}
