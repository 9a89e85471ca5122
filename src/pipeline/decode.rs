use crate::{
    error::ServiceError,
    model::PromptTokenizer,
    pipeline::{executor::Continuation, prompt::END_OF_SEQUENCE},
};

/// Drops end-of-sequence markers and surrounding whitespace. Nothing else
/// in the text is touched.
pub fn sanitize(raw: &str) -> String {
    raw.replace(END_OF_SEQUENCE, "").trim().to_string()
}

/// Turns a continuation into clean text. Any failure here is a
/// postprocessing error, never a generation error.
pub fn decode_continuation(
    tokenizer: &dyn PromptTokenizer,
    continuation: &Continuation,
) -> Result<String, ServiceError> {
    let raw = match continuation {
        Continuation::Text(text) => text.clone(),
        Continuation::Tokens(ids) => tokenizer
            .decode(ids)
            .map_err(|e| ServiceError::Postprocessing(e.to_string()))?,
    };
    Ok(sanitize(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WhitespaceTokenizer;

    #[test]
    fn strips_end_marker_and_whitespace() {
        assert_eq!(sanitize("  Paris is the capital.</s>\n"), "Paris is the capital.");
    }

    #[test]
    fn keeps_inner_content() {
        assert_eq!(sanitize("line one\n\nline two"), "line one\n\nline two");
    }

    #[test]
    fn text_continuation_is_sanitized() {
        let text = decode_continuation(&WhitespaceTokenizer, &Continuation::Text(" ok </s>".into()))
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[test]
    fn undecodable_tokens_are_postprocessing_errors() {
        let err = decode_continuation(&WhitespaceTokenizer, &Continuation::Tokens(vec![1, 2]))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Postprocessing(_)));
    }
}
