use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::ClassifierError;
use crate::retry::{linear_backoff, RetryConfig};

/// `{tool_name, description}` — the payload submitted alongside the fixed
/// analysis prompt for each tool descriptor under review.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierInput {
    pub tool_name: String,
    pub description: String,
}

/// The external LLM classifier contract (§6): one operation, a prompt and
/// structured input in, free text out. The core parses the text; it never
/// assumes a particular response schema from the transport itself.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, prompt: &str, input: &ClassifierInput) -> Result<String, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

/// Default classifier: a `reqwest`-based client against a generic
/// chat-completion endpoint. Retry/backoff/timeout live here rather than in
/// the engine, so the engine's scoring logic stays transport-agnostic.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    retry: RetryConfig,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(&self, prompt: &str, input: &ClassifierInput) -> Result<String, ClassifierError> {
        let content = format!(
            "{prompt}\n\nTool name: {}\nDescription: {}",
            input.tool_name, input.description
        );
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .timeout(self.retry.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ClassifierError::Timeout(self.retry.timeout)
                } else {
                    ClassifierError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ClassifierError::RateLimited {
                retry_after_secs: response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok()),
            });
        }
        if !status.is_success() {
            return Err(ClassifierError::Transport(format!("HTTP {status}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ClassifierError::MalformedOutput(err.to_string()))?;

        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ClassifierError::MalformedOutput("no content in response".to_string()))
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, prompt: &str, input: &ClassifierInput) -> Result<String, ClassifierError> {
        let mut last_err = None;
        for attempt in 0..=self.retry.max_retries {
            match self.send_once(prompt, input).await {
                Ok(text) => return Ok(text),
                Err(ClassifierError::RateLimited { .. }) if attempt < self.retry.max_retries => {
                    let delay = linear_backoff(attempt, &self.retry);
                    tracing::warn!(attempt, delay_secs = delay.as_secs(), "classifier rate limited, retrying");
                    tokio::time::sleep(delay).await;
                    last_err = Some(ClassifierError::RateLimited { retry_after_secs: None });
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(ClassifierError::Transport("retries exhausted".to_string())))
    }
}

/// Scripted classifier for tests: returns queued responses without any
/// network I/O, so parsing/scoring logic and rate-limit-recovery behavior
/// can be exercised deterministically and fast.
pub struct ScriptedClassifier {
    responses: Mutex<VecDeque<Result<String, ClassifierError>>>,
    calls: Mutex<Vec<ClassifierInput>>,
}

impl ScriptedClassifier {
    pub fn new(responses: Vec<Result<String, ClassifierError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _prompt: &str, input: &ClassifierInput) -> Result<String, ClassifierError> {
        self.calls.lock().push(input.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ClassifierError::Transport("no scripted response left".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_classifier_returns_queued_responses_in_order() {
        let classifier = ScriptedClassifier::new(vec![
            Ok("ALLOW".to_string()),
            Ok("DENY".to_string()),
        ]);
        let input = ClassifierInput {
            tool_name: "bash".to_string(),
            description: "runs shell commands".to_string(),
        };
        assert_eq!(classifier.classify("p", &input).await.unwrap(), "ALLOW");
        assert_eq!(classifier.classify("p", &input).await.unwrap(), "DENY");
        assert_eq!(classifier.call_count(), 2);
    }
}
