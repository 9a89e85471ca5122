use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    error::ServiceError,
    model::{ChatBackend, Completion, GenerationBackend, PromptTokenizer},
    pipeline::{ChatTurn, GenerationParameters},
};

/// Generated output with the echoed prompt already removed.
#[derive(Debug, Clone, PartialEq)]
pub enum Continuation {
    Tokens(Vec<u32>),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct RawGeneration {
    pub continuation: Continuation,
    pub input_token_count: usize,
    pub output_token_count: usize,
    /// Wall-clock time of the backend call alone.
    pub inference_time: Duration,
}

/// Runs one model call per invocation. No retries: a failure is final for
/// the request that triggered it.
pub struct InferenceExecutor {
    backend: Arc<dyn GenerationBackend>,
    chat: Arc<dyn ChatBackend>,
    tokenizer: Arc<dyn PromptTokenizer>,
    max_context_length: usize,
}

impl InferenceExecutor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        chat: Arc<dyn ChatBackend>,
        tokenizer: Arc<dyn PromptTokenizer>,
        max_context_length: usize,
    ) -> Self {
        Self {
            backend,
            chat,
            tokenizer,
            max_context_length: max_context_length.max(1),
        }
    }

    pub fn tokenizer(&self) -> &dyn PromptTokenizer {
        self.tokenizer.as_ref()
    }

    pub async fn execute(
        &self,
        prompt: &str,
        params: &GenerationParameters,
        timeout: Option<Duration>,
    ) -> Result<RawGeneration, ServiceError> {
        let encoded = self.tokenizer.prepare(prompt, self.max_context_length)?;
        if encoded.truncated {
            warn!(
                max_context_length = self.max_context_length,
                "prompt exceeds model context; truncating"
            );
        }
        let input_token_count = encoded.token_count;

        let start = Instant::now();
        let completion = with_timeout(timeout, self.backend.generate(&encoded, params)).await;
        let inference_time = start.elapsed();
        let completion = completion?;

        let (continuation, output_token_count) = match completion {
            Completion::Tokens(mut sequence) => {
                if sequence.len() < input_token_count {
                    return Err(ServiceError::Generation(format!(
                        "model returned {} tokens for a {input_token_count}-token prompt",
                        sequence.len()
                    )));
                }
                let generated = sequence.split_off(input_token_count);
                let count = generated.len();
                (Continuation::Tokens(generated), count)
            }
            Completion::Text(text) => {
                let count = self.tokenizer.count(&text)?;
                (Continuation::Text(text), count)
            }
        };

        debug!(
            backend = self.backend.name(),
            input_token_count,
            output_token_count,
            elapsed_ms = inference_time.as_millis() as u64,
            "generation finished"
        );

        Ok(RawGeneration {
            continuation,
            input_token_count,
            output_token_count,
            inference_time,
        })
    }

    /// Chat turns go to the chat backend as-is; `rendered` is the flattened
    /// conversation, used for input token accounting.
    pub async fn execute_chat(
        &self,
        turns: &[ChatTurn],
        rendered: &str,
        params: &GenerationParameters,
        timeout: Option<Duration>,
    ) -> Result<RawGeneration, ServiceError> {
        let input_token_count = self.tokenizer.count(rendered)?;

        let start = Instant::now();
        let reply = with_timeout(timeout, self.chat.chat(turns, params)).await;
        let inference_time = start.elapsed();
        let reply = reply?;

        let output_token_count = self.tokenizer.count(&reply)?;
        Ok(RawGeneration {
            continuation: Continuation::Text(reply),
            input_token_count,
            output_token_count,
            inference_time,
        })
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    call: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            ServiceError::Generation(format!("no reply from backend within {limit:?}"))
        })?,
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::model::{EncodedPrompt, WhitespaceTokenizer};

    /// Echoes the prompt ids (or words) back followed by `extra` tokens.
    struct Echo {
        extra: usize,
        as_tokens: bool,
    }

    #[async_trait]
    impl GenerationBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            prompt: &EncodedPrompt,
            _params: &GenerationParameters,
        ) -> Result<Completion, ServiceError> {
            if self.as_tokens {
                let mut ids: Vec<u32> = (0..prompt.token_count as u32).collect();
                ids.extend(std::iter::repeat(7).take(self.extra));
                Ok(Completion::Tokens(ids))
            } else {
                Ok(Completion::Text(vec!["word"; self.extra].join(" ")))
            }
        }

        async fn health(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn list_models(&self) -> Result<Value, ServiceError> {
            Ok(Value::Null)
        }
    }

    struct Silent;

    #[async_trait]
    impl ChatBackend for Silent {
        async fn chat(
            &self,
            _turns: &[ChatTurn],
            _params: &GenerationParameters,
        ) -> Result<String, ServiceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }
    }

    fn executor(backend: Echo, max_context_length: usize) -> InferenceExecutor {
        InferenceExecutor::new(
            Arc::new(backend),
            Arc::new(Silent),
            Arc::new(WhitespaceTokenizer),
            max_context_length,
        )
    }

    #[tokio::test]
    async fn token_continuation_excludes_prompt() {
        let exec = executor(Echo { extra: 4, as_tokens: true }, 64);
        let raw = exec
            .execute("one two three", &GenerationParameters::default(), None)
            .await
            .unwrap();
        assert_eq!(raw.input_token_count, 3);
        assert_eq!(raw.output_token_count, 4);
        assert_eq!(raw.continuation, Continuation::Tokens(vec![7; 4]));
    }

    #[tokio::test]
    async fn text_continuation_is_counted() {
        let exec = executor(Echo { extra: 5, as_tokens: false }, 64);
        let raw = exec
            .execute("hello there", &GenerationParameters::default(), None)
            .await
            .unwrap();
        assert_eq!(raw.input_token_count, 2);
        assert_eq!(raw.output_token_count, 5);
    }

    #[tokio::test]
    async fn long_prompts_are_truncated_not_rejected() {
        let exec = executor(Echo { extra: 1, as_tokens: false }, 3);
        let raw = exec
            .execute("a b c d e f", &GenerationParameters::default(), None)
            .await
            .unwrap();
        assert_eq!(raw.input_token_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_generation_error() {
        let exec = executor(Echo { extra: 1, as_tokens: false }, 8);
        let err = exec
            .execute_chat(
                &[ChatTurn::user("hi")],
                "hi",
                &GenerationParameters::default(),
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Generation(_)));
    }
}
