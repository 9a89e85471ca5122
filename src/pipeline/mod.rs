pub mod cache;
pub mod decode;
pub mod executor;
pub mod metrics;
pub mod params;
pub mod prompt;
pub mod router;

pub use executor::{Continuation, InferenceExecutor, RawGeneration};
pub use metrics::{GenerationMetrics, MetricsSnapshot, PipelineMetrics};
pub use params::{EndpointLimits, GenerationOverrides, GenerationParameters, ParameterResolver};
pub use prompt::{ChatTurn, Role};
pub use router::{RouterSettings, TaskRouter};
