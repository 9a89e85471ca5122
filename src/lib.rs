pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod server;

pub use config::AppConfig;
pub use error::ServiceError;
pub use model::{ModelRegistry, NlpRequest, NlpResponse, TaskType};
pub use pipeline::{RouterSettings, TaskRouter};
pub use server::build_router;
