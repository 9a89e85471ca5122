use std::path::Path;

use tokenizers::Tokenizer;

use crate::error::ServiceError;

/// A prompt after tokenization and context-length truncation.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPrompt {
    /// Prompt text that survived truncation.
    pub text: String,
    /// Token ids, when the tokenizer has a real vocabulary.
    pub ids: Option<Vec<u32>>,
    pub token_count: usize,
    pub truncated: bool,
}

pub trait PromptTokenizer: Send + Sync {
    fn count(&self, text: &str) -> Result<usize, ServiceError>;

    /// Encodes `text`, keeping only the first `max_tokens` tokens.
    fn prepare(&self, text: &str, max_tokens: usize) -> Result<EncodedPrompt, ServiceError>;

    fn decode(&self, ids: &[u32]) -> Result<String, ServiceError>;
}

/// Hugging Face tokenizer loaded from a `tokenizer.json`.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self, ServiceError> {
        let inner = Tokenizer::from_file(path).map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    /// Prompts get the post-processor's special tokens; generated text does not.
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>, ServiceError> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl PromptTokenizer for HfTokenizer {
    fn count(&self, text: &str) -> Result<usize, ServiceError> {
        self.encode(text, false).map(|ids| ids.len())
    }

    fn prepare(&self, text: &str, max_tokens: usize) -> Result<EncodedPrompt, ServiceError> {
        let mut ids = self.encode(text, true)?;
        let truncated = ids.len() > max_tokens;
        let text = if truncated {
            ids.truncate(max_tokens);
            self.inner
                .decode(&ids, false)
                .map_err(|e| ServiceError::Tokenizer(e.to_string()))?
        } else {
            text.to_string()
        };
        Ok(EncodedPrompt {
            text,
            token_count: ids.len(),
            ids: Some(ids),
            truncated,
        })
    }

    fn decode(&self, ids: &[u32]) -> Result<String, ServiceError> {
        self.inner
            .decode(ids, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))
    }
}

/// Approximate tokenizer used when no vocabulary is configured: one token
/// per whitespace-separated word. It cannot decode ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl PromptTokenizer for WhitespaceTokenizer {
    fn count(&self, text: &str) -> Result<usize, ServiceError> {
        Ok(text.split_whitespace().count())
    }

    fn prepare(&self, text: &str, max_tokens: usize) -> Result<EncodedPrompt, ServiceError> {
        let cut = text
            .split_whitespace()
            .nth(max_tokens)
            .map(|word| word.as_ptr() as usize - text.as_ptr() as usize);
        let (kept, truncated) = match cut {
            Some(offset) => (text[..offset].trim_end(), true),
            None => (text, false),
        };
        Ok(EncodedPrompt {
            text: kept.to_string(),
            ids: None,
            token_count: kept.split_whitespace().count(),
            truncated,
        })
    }

    fn decode(&self, _ids: &[u32]) -> Result<String, ServiceError> {
        Err(ServiceError::Tokenizer(
            "whitespace tokenizer cannot decode token ids".into(),
        ))
    }
}
