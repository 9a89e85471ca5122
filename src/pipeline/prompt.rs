//! Prompt templating for the Mistral instruction format.

use serde::{Deserialize, Serialize};

use crate::model::{NlpRequest, TaskType};

pub const INSTRUCTION_OPEN: &str = "<s>[INST]";
pub const INSTRUCTION_CLOSE: &str = "[/INST]";
pub const END_OF_SEQUENCE: &str = "</s>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub fn is_wrapped(text: &str) -> bool {
    text.starts_with(INSTRUCTION_OPEN)
}

/// Wraps `text` in instruction markers unless it already carries them.
pub fn wrap_instruction(text: &str) -> String {
    if is_wrapped(text) {
        text.to_string()
    } else {
        format!("{INSTRUCTION_OPEN} {text} {INSTRUCTION_CLOSE}")
    }
}

/// History alternates user/assistant starting with user; `message` is always
/// the final user turn. Odd or empty histories are fine.
pub fn chat_turns(history: &[String], message: &str) -> Vec<ChatTurn> {
    let mut turns: Vec<ChatTurn> = history
        .iter()
        .enumerate()
        .map(|(idx, content)| {
            if idx % 2 == 0 {
                ChatTurn::user(content.as_str())
            } else {
                ChatTurn::assistant(content.as_str())
            }
        })
        .collect();
    turns.push(ChatTurn::user(message));
    turns
}

/// Renders a conversation as one prompt:
/// `<s>[INST] u1 [/INST] a1</s>[INST] u2 [/INST]`.
pub fn render_conversation(history: &[String], message: &str) -> String {
    if is_wrapped(message) || history.is_empty() {
        return wrap_instruction(message);
    }

    let mut prompt = String::from("<s>");
    for turn in chat_turns(history, message) {
        match turn.role {
            Role::User => {
                prompt.push_str("[INST] ");
                prompt.push_str(&turn.content);
                prompt.push(' ');
                prompt.push_str(INSTRUCTION_CLOSE);
            }
            Role::Assistant => {
                prompt.push(' ');
                prompt.push_str(&turn.content);
                prompt.push_str(END_OF_SEQUENCE);
            }
        }
    }
    prompt
}

/// Instruction text for a task, before wrapping.
pub fn task_instruction(request: &NlpRequest) -> String {
    let text = request.text();
    match request.task_type() {
        TaskType::QuestionAnswering => match request.context() {
            Some(context) => format!(
                "Answer the question using the context below.\n\nContext: {context}\n\nQuestion: {text}"
            ),
            None => format!("Answer the following question.\n\nQuestion: {text}"),
        },
        TaskType::Summarization => {
            format!("Summarize the following text concisely.\n\nText: {text}")
        }
        TaskType::Translation => {
            let language = request.target_language().unwrap_or(DEFAULT_TARGET_LANGUAGE);
            format!("Translate the following text into {language}.\n\nText: {text}")
        }
        TaskType::Classification => match request.categories() {
            Some(categories) => format!(
                "Classify the following text into exactly one of these categories: {}. \
                 Answer with the category only.\n\nText: {text}",
                categories.join(", ")
            ),
            None => format!(
                "Classify the following text and answer with a single category label.\n\nText: {text}"
            ),
        },
        TaskType::Generation | TaskType::Chat | TaskType::Ner => text.to_string(),
    }
}

pub const DEFAULT_TARGET_LANGUAGE: &str = "français";

/// Model-ready prompt for any generative task.
pub fn build_prompt(request: &NlpRequest) -> String {
    match request.task_type() {
        TaskType::Generation | TaskType::Chat => {
            render_conversation(request.history(), request.text())
        }
        _ => wrap_instruction(&task_instruction(request)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_is_idempotent() {
        let once = wrap_instruction("Tell me a story");
        assert_eq!(once, "<s>[INST] Tell me a story [/INST]");
        assert_eq!(wrap_instruction(&once), once);
        assert_eq!(once.matches(INSTRUCTION_OPEN).count(), 1);
    }

    #[test]
    fn wrapped_message_ignores_history() {
        let wrapped = "<s>[INST] hello [/INST]";
        let history = vec!["earlier".to_string()];
        assert_eq!(render_conversation(&history, wrapped), wrapped);
    }

    #[test]
    fn history_round_trips_in_order() {
        let history: Vec<String> = ["hi", "hello", "how are you"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let turns = chat_turns(&history, "fine");
        assert_eq!(
            turns,
            vec![
                ChatTurn::user("hi"),
                ChatTurn::assistant("hello"),
                ChatTurn::user("how are you"),
                ChatTurn::user("fine"),
            ]
        );
    }

    #[test]
    fn empty_history_yields_single_turn() {
        assert_eq!(chat_turns(&[], "ping"), vec![ChatTurn::user("ping")]);
    }

    #[test]
    fn conversation_renders_alternating_markers() {
        let history = vec!["hi".to_string(), "hello".to_string()];
        assert_eq!(
            render_conversation(&history, "fine"),
            "<s>[INST] hi [/INST] hello</s>[INST] fine [/INST]"
        );
    }

    #[test]
    fn question_embeds_context() {
        let request = NlpRequest::new(TaskType::QuestionAnswering, "Who wrote it?")
            .unwrap()
            .with_context(Some("Hugo wrote Les Misérables.".into()));
        let prompt = build_prompt(&request);
        assert!(prompt.starts_with(INSTRUCTION_OPEN));
        assert!(prompt.contains("Context: Hugo wrote Les Misérables."));
        assert!(prompt.contains("Question: Who wrote it?"));
    }

    #[test]
    fn translation_embeds_target_language() {
        let request = NlpRequest::new(TaskType::Translation, "Good morning")
            .unwrap()
            .with_target_language(Some("German".into()));
        assert!(build_prompt(&request).contains("into German."));

        let default = NlpRequest::new(TaskType::Translation, "Good morning").unwrap();
        assert!(build_prompt(&default).contains("into français."));
    }

    #[test]
    fn classification_lists_categories() {
        let request = NlpRequest::new(TaskType::Classification, "Great match last night")
            .unwrap()
            .with_categories(Some(vec!["sport".into(), "politics".into()]));
        assert!(build_prompt(&request).contains("categories: sport, politics."));
    }

    #[test]
    fn task_prompts_wrap_even_if_input_is_wrapped() {
        let request =
            NlpRequest::new(TaskType::Summarization, "<s>[INST] some text [/INST]").unwrap();
        let prompt = build_prompt(&request);
        assert!(prompt.starts_with("<s>[INST] Summarize"));
    }
}
