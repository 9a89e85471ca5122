mod backend;
#[cfg(feature = "tch-backend")]
pub mod loader;
mod registry;
pub mod remote;
pub mod sampling;
mod tokenizer;
mod types;

pub use backend::{ChatBackend, Completion, EntityBackend, GenerationBackend};
pub use registry::ModelRegistry;
pub use tokenizer::{EncodedPrompt, HfTokenizer, PromptTokenizer, WhitespaceTokenizer};
pub use types::{
    NlpRequest, NlpResponse, Priority, ResponseMetadata, ResponseStatus, TaskOutput, TaskType,
};
