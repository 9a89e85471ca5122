use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use nlp_gateway::{
    ServiceError,
    model::{
        ChatBackend, Completion, EncodedPrompt, EntityBackend, GenerationBackend,
        remote::{ChatClient, CompletionClient, EntityClient},
    },
    pipeline::{ChatTurn, GenerationParameters},
};
use serde_json::json;

fn prompt(text: &str) -> EncodedPrompt {
    EncodedPrompt {
        text: text.into(),
        ids: None,
        token_count: text.split_whitespace().count(),
        truncated: false,
    }
}

#[tokio::test]
async fn completion_posts_prompt_and_returns_text() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/completions")
                .body_contains("\"model\":\"mistral\"")
                .body_contains("[INST] hi [/INST]");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"text":" hello there"}]}"#);
        })
        .await;

    let client = CompletionClient::new(
        reqwest::Client::new(),
        server.base_url(),
        server.base_url(),
        "mistral",
    );
    let out = client
        .generate(&prompt("<s>[INST] hi [/INST]"), &GenerationParameters::default())
        .await
        .unwrap();
    mock.assert_async().await;
    assert_eq!(out, Completion::Text(" hello there".into()));
}

#[tokio::test]
async fn greedy_completion_is_sent_with_zero_temperature() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/completions")
                .body_contains("\"temperature\":0.0");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"text":"ok"}]}"#);
        })
        .await;

    let client = CompletionClient::new(
        reqwest::Client::new(),
        server.base_url(),
        server.base_url(),
        "mistral",
    );
    let params = GenerationParameters {
        do_sample: false,
        ..Default::default()
    };
    client.generate(&prompt("x"), &params).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn server_error_is_backend_unavailable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/completions");
            then.status(503).body("overloaded");
        })
        .await;

    let client = CompletionClient::new(
        reqwest::Client::new(),
        server.base_url(),
        server.base_url(),
        "mistral",
    );
    let err = client
        .generate(&prompt("x"), &GenerationParameters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BackendUnavailable(ref msg) if msg.contains("overloaded")));
}

#[tokio::test]
async fn empty_choices_is_a_generation_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/completions");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[]}"#);
        })
        .await;

    let client = CompletionClient::new(
        reqwest::Client::new(),
        server.base_url(),
        server.base_url(),
        "mistral",
    );
    let err = client
        .generate(&prompt("x"), &GenerationParameters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Generation(_)));
}

#[tokio::test]
async fn models_come_from_management_api() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/models");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"models":[{"modelName":"mistral"}]}"#);
        })
        .await;

    let client = CompletionClient::new(
        reqwest::Client::new(),
        "http://127.0.0.1:9",
        server.base_url(),
        "mistral",
    );
    client.health().await.unwrap();
    let models = client.list_models().await.unwrap();
    assert_eq!(mock.hits_async().await, 2);
    assert_eq!(models["models"][0]["modelName"], "mistral");
}

#[tokio::test]
async fn chat_sends_alternating_roles() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains(r#"{"role":"user","content":"hi"}"#)
                .body_contains(r#"{"role":"assistant","content":"hello"}"#);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"role":"assistant","content":"fine, thanks"}}]}"#);
        })
        .await;

    let client = ChatClient::new(reqwest::Client::new(), server.base_url(), "mistral");
    let turns = vec![
        ChatTurn::user("hi"),
        ChatTurn::assistant("hello"),
        ChatTurn::user("how are you?"),
    ];
    let reply = client
        .chat(&turns, &GenerationParameters::default())
        .await
        .unwrap();
    mock.assert_async().await;
    assert_eq!(reply, "fine, thanks");
}

#[tokio::test]
async fn entities_are_returned_verbatim() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/predictions/ner").body("Ada lives in London");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"[{"entity":"PER","word":"Ada"},{"entity":"LOC","word":"London"}]"#);
        })
        .await;

    let client = EntityClient::new(reqwest::Client::new(), &server.base_url(), "ner");
    let entities = client.extract("Ada lives in London").await.unwrap();
    mock.assert_async().await;
    assert_eq!(
        entities,
        json!([{"entity":"PER","word":"Ada"},{"entity":"LOC","word":"London"}])
    );
}
