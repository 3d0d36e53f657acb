//! Integration tests for the LLM chat-completion client
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use shopsage::config::{LlmConfig, ModelConfig, RequestConfig};
use shopsage::error::LlmError;
use shopsage::llm::{ChatCompleter, ChatRequest, LlmClient, Message};

/// Create a test client pointing to the mock server
fn create_test_client(base_url: &str) -> LlmClient {
    create_test_client_with_retries(base_url, 0)
}

fn create_test_client_with_retries(base_url: &str, max_retries: u32) -> LlmClient {
    let config = LlmConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        models: ModelConfig::default(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 1,
    };

    LlmClient::new(&config, request_config).expect("Failed to create client")
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"content": content}}],
        "usage": {
            "prompt_tokens": 100,
            "completion_tokens": 50,
            "total_tokens": 150
        }
    })
}

#[tokio::test]
async fn test_successful_chat_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
            r#"{"decision": "proceed", "reason": "credible batch"}"#,
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let request = ChatRequest::new("gemini-2.0-flash", vec![Message::user("judge this")]);
    let result = client.chat(request).await;

    assert!(result.is_ok(), "Chat call should succeed: {:?}", result.err());
    let response = result.unwrap();
    assert_eq!(
        response.completion(),
        r#"{"decision": "proceed", "reason": "credible batch"}"#
    );
    let usage = response.usage.expect("usage should be present");
    assert_eq!(usage.total_tokens, Some(150));
}

#[tokio::test]
async fn test_complete_returns_first_choice_text() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("plain answer")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let result = client
        .complete("gemini-2.0-flash", vec![Message::user("q")])
        .await;

    assert_eq!(result.unwrap(), "plain answer");
}

#[tokio::test]
async fn test_server_error_exhausts_into_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = create_test_client_with_retries(&mock_server.uri(), 1);
    let request = ChatRequest::new("gemini-2.0-flash", vec![Message::user("q")]);
    let result = client.chat(request).await;

    match result {
        Err(LlmError::Unavailable { message, retries }) => {
            assert_eq!(retries, 2);
            assert!(message.contains("500"), "message should carry the status: {}", message);
        }
        other => panic!("expected Unavailable, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_retry_recovers_after_transient_failure() {
    let mock_server = MockServer::start().await;

    // First attempt fails, the retry lands on the healthy responder.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client_with_retries(&mock_server.uri(), 1);
    let request = ChatRequest::new("gemini-2.0-flash", vec![Message::user("q")]);
    let result = client.chat(request).await;

    assert_eq!(result.unwrap().completion(), "recovered");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let request = ChatRequest::new("gemini-2.0-flash", vec![Message::user("q")]);
    let result = client.chat(request).await;

    match result {
        Err(LlmError::Unavailable { message, .. }) => {
            assert!(
                message.contains("Invalid response"),
                "parse failure should surface: {}",
                message
            );
        }
        other => panic!("expected Unavailable, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_empty_choices_completes_with_empty_string() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let result = client
        .complete("gemini-2.0-flash", vec![Message::user("q")])
        .await;

    assert_eq!(result.unwrap(), "");
}
