use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use anyhow::Context;

use crate::pipeline::GenerationParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// OpenAI-compatible completion server reached over HTTP.
    Remote,
    /// TorchScript module executed in-process.
    Local,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_lowercase().as_str() {
            "remote" | "http" => Ok(BackendKind::Remote),
            "local" | "torchscript" => Ok(BackendKind::Local),
            other => anyhow::bail!("unknown MODEL_BACKEND '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub backend: BackendKind,
    pub model_backend_url: String,
    pub management_url: String,
    pub chat_backend_url: String,
    pub ner_backend_url: String,
    pub ner_model: String,
    pub model_id: String,
    pub model_version: String,
    pub tokenizer_path: Option<PathBuf>,
    pub max_context_length: usize,
    pub generation_defaults: GenerationParameters,
    pub backend_timeout: Duration,
    pub batch_concurrency: usize,
    pub cache_capacity: usize,
    pub module_path: PathBuf,
    pub device: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000));

        let backend = env::var("MODEL_BACKEND")
            .unwrap_or_else(|_| "remote".into())
            .parse()?;

        let model_backend_url =
            env::var("MODEL_BACKEND_URL").unwrap_or_else(|_| "http://localhost:8080".into());
        let management_url =
            env::var("MODEL_MANAGEMENT_URL").unwrap_or_else(|_| "http://localhost:8081".into());
        let chat_backend_url =
            env::var("CHAT_BACKEND_URL").unwrap_or_else(|_| "http://localhost:8001".into());
        let ner_backend_url =
            env::var("NER_BACKEND_URL").unwrap_or_else(|_| "http://localhost:8080".into());
        let ner_model = env::var("NER_MODEL").unwrap_or_else(|_| "ner".into());

        let model_id = env::var("MODEL_ID").unwrap_or_else(|_| "mistral-7b-instruct".into());
        let model_version = env::var("MODEL_VERSION").unwrap_or_else(|_| "1.0".into());
        let tokenizer_path = env::var("TOKENIZER_PATH").ok().map(PathBuf::from);

        let fallback = GenerationParameters::default();
        let generation_defaults = GenerationParameters {
            max_new_tokens: parsed("MAX_NEW_TOKENS", fallback.max_new_tokens),
            temperature: parsed("TEMPERATURE", fallback.temperature),
            top_p: parsed("TOP_P", fallback.top_p),
            top_k: parsed("TOP_K", fallback.top_k),
            repetition_penalty: parsed("REPETITION_PENALTY", fallback.repetition_penalty),
            do_sample: parsed("DO_SAMPLE", fallback.do_sample),
        };
        generation_defaults
            .validate()
            .context("generation defaults from environment")?;

        let module_path = PathBuf::from(
            env::var("MODULE_PATH").unwrap_or_else(|_| "models/model.ts".to_string()),
        );
        let device = env::var("DEVICE").unwrap_or_else(|_| "cpu".into());

        Ok(Self {
            listen_addr,
            backend,
            model_backend_url,
            management_url,
            chat_backend_url,
            ner_backend_url,
            ner_model,
            model_id,
            model_version,
            tokenizer_path,
            max_context_length: parsed("MAX_CONTEXT_LENGTH", 4096),
            generation_defaults,
            backend_timeout: Duration::from_secs(parsed("BACKEND_TIMEOUT_SECS", 120)),
            batch_concurrency: parsed("BATCH_CONCURRENCY", 4),
            cache_capacity: parsed("CACHE_CAPACITY", 256),
            module_path,
            device,
        })
    }
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("HTTP".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert_eq!("torchscript".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert!("gpu-farm".parse::<BackendKind>().is_err());
    }
}
