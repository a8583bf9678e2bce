//! Integration coverage for `HttpClassifier`'s retry/backoff against a real
//! HTTP endpoint (stood up by `wiremock`), per §4.14/§8: the classifier
//! client owns retry/backoff end to end, including the HTTP layer the unit
//! tests in `classifier.rs` (which exercise `ScriptedClassifier` instead)
//! never touch.

use std::time::Duration;

use sentinel_core::classifier::{Classifier, ClassifierInput, HttpClassifier};
use sentinel_core::retry::RetryConfig;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
        inter_request_delay: Duration::from_millis(0),
    }
}

fn sample_input() -> ClassifierInput {
    ClassifierInput {
        tool_name: "bash".to_string(),
        description: "runs shell commands".to_string(),
    }
}

fn chat_response_body(content: &str) -> serde_json::Value {
    serde_json::json!({ "choices": [{ "message": { "content": content } }] })
}

#[tokio::test]
async fn recovers_after_one_rate_limit_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response_body("ALLOW")))
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(server.uri(), "test-model", "test-key")
        .with_retry_config(fast_retry_config());

    let result = classifier.classify("prompt", &sample_input()).await;
    assert_eq!(result.unwrap(), "ALLOW");
}

#[tokio::test]
async fn exhausts_retries_and_returns_rate_limited_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(server.uri(), "test-model", "test-key")
        .with_retry_config(fast_retry_config());

    let err = classifier
        .classify("prompt", &sample_input())
        .await
        .expect_err("should exhaust retries");
    assert!(matches!(
        err,
        sentinel_core::error::ClassifierError::RateLimited { .. }
    ));
}

#[tokio::test]
async fn non_rate_limit_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = HttpClassifier::new(server.uri(), "test-model", "test-key")
        .with_retry_config(fast_retry_config());

    let err = classifier
        .classify("prompt", &sample_input())
        .await
        .expect_err("should surface the server error");
    assert!(matches!(
        err,
        sentinel_core::error::ClassifierError::Transport(_)
    ));

    server.verify().await;
}
