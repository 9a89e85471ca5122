//! Generation parameter resolution.
//!
//! A request carries a sparse override map; every task type carries its own
//! sparse defaults; the process carries a complete global set. Resolution
//! takes the first value present in that order and then checks every field
//! against its bound. Out-of-bound values are rejected, never clamped.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::ServiceError, model::TaskType};

pub const MAX_NEW_TOKENS_RANGE: RangeInclusive<i64> = 1..=2048;
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.1..=2.0;
pub const TOP_P_RANGE: RangeInclusive<f64> = 0.1..=1.0;
pub const TOP_K_RANGE: RangeInclusive<i64> = 1..=100;
pub const REPETITION_PENALTY_RANGE: RangeInclusive<f64> = 1.0..=2.0;

/// Fully populated, bounds-checked sampling settings for one model call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repetition_penalty: f64,
    pub do_sample: bool,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 50,
            repetition_penalty: 1.1,
            do_sample: true,
        }
    }
}

impl GenerationParameters {
    pub fn validate(&self) -> Result<(), ServiceError> {
        check_int("max_new_tokens", self.max_new_tokens as i64, MAX_NEW_TOKENS_RANGE)?;
        check_float("temperature", self.temperature, TEMPERATURE_RANGE)?;
        check_float("top_p", self.top_p, TOP_P_RANGE)?;
        check_int("top_k", self.top_k as i64, TOP_K_RANGE)?;
        check_float(
            "repetition_penalty",
            self.repetition_penalty,
            REPETITION_PENALTY_RANGE,
        )?;
        Ok(())
    }
}

/// Sparse parameter set. Unset fields fall through to the next layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOverrides {
    pub max_new_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i64>,
    pub repetition_penalty: Option<f64>,
    pub do_sample: Option<bool>,
}

impl GenerationOverrides {
    /// Reads the known keys of a caller-supplied map; anything else is ignored.
    ///
    /// `max_tokens` and `max_length` are accepted as spellings of
    /// `max_new_tokens`.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ServiceError> {
        let max_new_tokens = ["max_new_tokens", "max_tokens", "max_length"]
            .into_iter()
            .find_map(|key| map.get(key).filter(|v| !v.is_null()))
            .map(|value| read_int("max_new_tokens", value))
            .transpose()?;

        Ok(Self {
            max_new_tokens,
            temperature: read_optional(map, "temperature", read_float)?,
            top_p: read_optional(map, "top_p", read_float)?,
            top_k: read_optional(map, "top_k", read_int)?,
            repetition_penalty: read_optional(map, "repetition_penalty", read_float)?,
            do_sample: read_optional(map, "do_sample", read_bool)?,
        })
    }

    fn or(&self, fallback: &GenerationOverrides) -> GenerationOverrides {
        GenerationOverrides {
            max_new_tokens: self.max_new_tokens.or(fallback.max_new_tokens),
            temperature: self.temperature.or(fallback.temperature),
            top_p: self.top_p.or(fallback.top_p),
            top_k: self.top_k.or(fallback.top_k),
            repetition_penalty: self.repetition_penalty.or(fallback.repetition_penalty),
            do_sample: self.do_sample.or(fallback.do_sample),
        }
    }
}

/// Per-task defaults layered between the request and the global set.
pub fn task_defaults(task: TaskType) -> GenerationOverrides {
    match task {
        TaskType::Generation | TaskType::Ner => GenerationOverrides::default(),
        TaskType::QuestionAnswering => GenerationOverrides {
            max_new_tokens: Some(300),
            temperature: Some(0.5),
            ..Default::default()
        },
        TaskType::Summarization => GenerationOverrides {
            max_new_tokens: Some(150),
            temperature: Some(0.3),
            ..Default::default()
        },
        TaskType::Translation => GenerationOverrides {
            max_new_tokens: Some(512),
            temperature: Some(0.3),
            ..Default::default()
        },
        TaskType::Classification => GenerationOverrides {
            max_new_tokens: Some(100),
            temperature: Some(0.1),
            do_sample: Some(false),
            ..Default::default()
        },
        TaskType::Chat => GenerationOverrides {
            max_new_tokens: Some(512),
            temperature: Some(0.7),
            top_p: Some(0.9),
            ..Default::default()
        },
    }
}

#[derive(Debug, Clone)]
pub struct ParameterResolver {
    global: GenerationParameters,
}

impl ParameterResolver {
    pub fn new(global: GenerationParameters) -> Result<Self, ServiceError> {
        global.validate()?;
        Ok(Self { global })
    }

    pub fn global(&self) -> &GenerationParameters {
        &self.global
    }

    pub fn resolve(
        &self,
        task: TaskType,
        overrides: &Map<String, Value>,
    ) -> Result<GenerationParameters, ServiceError> {
        let merged = GenerationOverrides::from_map(overrides)?.or(&task_defaults(task));

        let max_new_tokens = merged
            .max_new_tokens
            .unwrap_or(self.global.max_new_tokens as i64);
        let top_k = merged.top_k.unwrap_or(self.global.top_k as i64);
        check_int("max_new_tokens", max_new_tokens, MAX_NEW_TOKENS_RANGE)?;
        check_int("top_k", top_k, TOP_K_RANGE)?;

        let params = GenerationParameters {
            max_new_tokens: max_new_tokens as u32,
            temperature: merged.temperature.unwrap_or(self.global.temperature),
            top_p: merged.top_p.unwrap_or(self.global.top_p),
            top_k: top_k as u32,
            repetition_penalty: merged
                .repetition_penalty
                .unwrap_or(self.global.repetition_penalty),
            do_sample: merged.do_sample.unwrap_or(self.global.do_sample),
        };
        params.validate()?;
        Ok(params)
    }
}

/// Tighter admission bounds a task endpoint places on top of the global
/// ranges. Checked on the caller's explicit values only.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointLimits {
    pub max_new_tokens: RangeInclusive<i64>,
    pub temperature: RangeInclusive<f64>,
}

impl EndpointLimits {
    pub const QUESTION_ANSWERING: EndpointLimits = EndpointLimits {
        max_new_tokens: 1..=1024,
        temperature: 0.1..=1.5,
    };
    pub const SUMMARIZATION: EndpointLimits = EndpointLimits {
        max_new_tokens: 50..=500,
        temperature: 0.1..=1.0,
    };
    pub const TRANSLATION: EndpointLimits = EndpointLimits {
        max_new_tokens: 1..=1024,
        temperature: TEMPERATURE_RANGE,
    };
    pub const CLASSIFICATION: EndpointLimits = EndpointLimits {
        max_new_tokens: 1..=300,
        temperature: TEMPERATURE_RANGE,
    };

    pub fn check(&self, overrides: &Map<String, Value>) -> Result<(), ServiceError> {
        let requested = GenerationOverrides::from_map(overrides)?;
        if let Some(max_new_tokens) = requested.max_new_tokens {
            check_int("max_new_tokens", max_new_tokens, self.max_new_tokens.clone())?;
        }
        if let Some(temperature) = requested.temperature {
            check_float("temperature", temperature, self.temperature.clone())?;
        }
        Ok(())
    }
}

fn read_optional<T>(
    map: &Map<String, Value>,
    key: &'static str,
    read: fn(&'static str, &Value) -> Result<T, ServiceError>,
) -> Result<Option<T>, ServiceError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => read(key, value).map(Some),
    }
}

fn read_float(name: &'static str, value: &Value) -> Result<f64, ServiceError> {
    value
        .as_f64()
        .ok_or_else(|| ServiceError::Validation(format!("{name} must be a number")))
}

fn read_int(name: &'static str, value: &Value) -> Result<i64, ServiceError> {
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    if value.as_u64().is_some() {
        return Ok(i64::MAX);
    }
    match value.as_f64() {
        Some(v) if v.fract() == 0.0 => Ok(v.clamp(i64::MIN as f64, i64::MAX as f64) as i64),
        _ => Err(ServiceError::Validation(format!("{name} must be an integer"))),
    }
}

fn read_bool(name: &'static str, value: &Value) -> Result<bool, ServiceError> {
    value
        .as_bool()
        .ok_or_else(|| ServiceError::Validation(format!("{name} must be a boolean")))
}

fn check_float(
    name: &'static str,
    value: f64,
    range: RangeInclusive<f64>,
) -> Result<(), ServiceError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ServiceError::ParameterOutOfRange {
            name,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

fn check_int(
    name: &'static str,
    value: i64,
    range: RangeInclusive<i64>,
) -> Result<(), ServiceError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ServiceError::ParameterOutOfRange {
            name,
            value: value as f64,
            min: *range.start() as f64,
            max: *range.end() as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn resolver() -> ParameterResolver {
        ParameterResolver::new(GenerationParameters::default()).unwrap()
    }

    fn overrides(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn request_value_beats_task_default() {
        let params = resolver()
            .resolve(
                TaskType::Summarization,
                &overrides(json!({"temperature": 0.9})),
            )
            .unwrap();
        assert_eq!(params.temperature, 0.9);
        assert_eq!(params.max_new_tokens, 150);
    }

    #[test]
    fn task_default_beats_global() {
        let params = resolver()
            .resolve(TaskType::QuestionAnswering, &Map::new())
            .unwrap();
        assert_eq!(params.max_new_tokens, 300);
        assert_eq!(params.temperature, 0.5);
        assert_eq!(params.top_k, 50);
        assert_eq!(params.repetition_penalty, 1.1);
    }

    #[test]
    fn temperature_outside_bounds_is_rejected() {
        for value in [0.0, 0.09, 2.01, 5.0, -1.0] {
            let err = resolver()
                .resolve(TaskType::Generation, &overrides(json!({"temperature": value})))
                .unwrap_err();
            assert!(
                matches!(err, ServiceError::ParameterOutOfRange { name: "temperature", .. }),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn temperature_inside_bounds_is_kept_exactly() {
        for value in [0.1, 0.25, 1.0, 1.999, 2.0] {
            let params = resolver()
                .resolve(TaskType::Generation, &overrides(json!({"temperature": value})))
                .unwrap();
            assert_eq!(params.temperature, value);
        }
    }

    #[test]
    fn integer_bounds_are_enforced() {
        let r = resolver();
        for body in [
            json!({"max_new_tokens": 0}),
            json!({"max_new_tokens": 2049}),
            json!({"top_k": 0}),
            json!({"top_k": 101}),
            json!({"max_tokens": -4}),
        ] {
            let err = r.resolve(TaskType::Generation, &overrides(body)).unwrap_err();
            assert!(err.is_validation());
        }
        let params = r
            .resolve(TaskType::Generation, &overrides(json!({"max_tokens": 2048, "top_k": 100})))
            .unwrap();
        assert_eq!(params.max_new_tokens, 2048);
        assert_eq!(params.top_k, 100);
    }

    #[test]
    fn float_bounds_are_enforced() {
        let r = resolver();
        for body in [
            json!({"top_p": 0.05}),
            json!({"top_p": 1.01}),
            json!({"repetition_penalty": 0.99}),
            json!({"repetition_penalty": 2.5}),
        ] {
            assert!(r.resolve(TaskType::Generation, &overrides(body)).is_err());
        }
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let params = resolver()
            .resolve(
                TaskType::Generation,
                &overrides(json!({"seed": 7, "style": "pirate", "timeout_seconds": 3})),
            )
            .unwrap();
        assert_eq!(params, GenerationParameters::default());
    }

    #[test]
    fn wrong_type_is_a_validation_error() {
        let err = resolver()
            .resolve(TaskType::Generation, &overrides(json!({"temperature": "hot"})))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn classification_is_greedy_by_default() {
        let params = resolver()
            .resolve(TaskType::Classification, &Map::new())
            .unwrap();
        assert!(!params.do_sample);
    }

    #[test]
    fn out_of_bound_global_defaults_are_refused() {
        let global = GenerationParameters {
            temperature: 3.0,
            ..Default::default()
        };
        assert!(ParameterResolver::new(global).is_err());
    }

    #[test]
    fn summarization_endpoint_tightens_length() {
        let limits = EndpointLimits::SUMMARIZATION;
        assert!(limits.check(&overrides(json!({"max_length": 150}))).is_ok());
        for bad in [10, 2000] {
            let err = limits
                .check(&overrides(json!({ "max_length": bad })))
                .unwrap_err();
            assert!(matches!(
                err,
                ServiceError::ParameterOutOfRange { name: "max_new_tokens", .. }
            ));
        }
        assert!(limits.check(&overrides(json!({"temperature": 1.2}))).is_err());
    }

    #[test]
    fn endpoint_limits_ignore_absent_values() {
        assert!(EndpointLimits::CLASSIFICATION.check(&Map::new()).is_ok());
        assert!(EndpointLimits::CLASSIFICATION
            .check(&overrides(json!({"max_tokens": 301})))
            .is_err());
        assert!(EndpointLimits::QUESTION_ANSWERING
            .check(&overrides(json!({"temperature": 1.6})))
            .is_err());
    }
}
