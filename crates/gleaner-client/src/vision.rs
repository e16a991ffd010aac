use std::time::Duration;

use gleaner_core::error::AppError;
use gleaner_core::traits::Classifier;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// DashScope's OpenAI-compatible endpoint, which serves the Qwen-VL models.
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "qwen-vl-plus";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI-compatible vision-language classifier.
///
/// Sends one user message holding the instruction text and the image URL and
/// returns the model's reply verbatim. Works with any chat-completions API
/// that accepts `image_url` content parts (DashScope, OpenAI, vLLM, ...).
#[derive(Clone)]
pub struct OpenAiClassifier {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiClassifier {
    pub fn new(api_key: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, DEFAULT_MODEL, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(&self.api_key, &self.model, &self.base_url, timeout)
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

// ---- Chat completions types ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn build_request<'a>(model: &'a str, image_url: &'a str, instruction: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![Message {
            role: "user",
            content: vec![
                ContentPart::Text { text: instruction },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: image_url },
                },
            ],
        }],
    }
}

impl Classifier for OpenAiClassifier {
    async fn classify(&self, image_url: &str, instruction: &str) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = build_request(&self.model, image_url, instruction);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {}", e))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();

            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status_code, body));

            return Err(AppError::ClassifierError {
                message,
                status_code,
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            AppError::ClassifierError {
                message: format!("Failed to parse response: {}", e),
                status_code: status.as_u16(),
            }
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| AppError::ClassifierError {
                message: "Empty response from classifier".into(),
                status_code: status.as_u16(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::OneShotServer;

    #[test]
    fn test_request_shape() {
        let request = build_request("qwen-vl-plus", "https://cdn/a.jpg", "six panels?");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "model": "qwen-vl-plus",
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "six panels?"},
                        {"type": "image_url", "image_url": {"url": "https://cdn/a.jpg"}}
                    ]
                }]
            })
        );
    }

    #[tokio::test]
    async fn returns_trimmed_verdict() {
        let server = OneShotServer::start_json(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":" Yes \n"}}]}"#,
        )
        .await;
        let classifier = OpenAiClassifier::with_base_url("sk-test", "qwen-vl-plus", &server.url("/v1/"))
            .unwrap();

        let verdict = classifier
            .classify("https://cdn/a.jpg", "six panels?")
            .await
            .unwrap();

        assert_eq!(verdict, "Yes");
        let request = server.request().await;
        assert!(request.starts_with("POST /v1/chat/completions "));
        assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains("\"image_url\":{\"url\":\"https://cdn/a.jpg\"}"));
    }

    #[tokio::test]
    async fn api_error_carries_status_and_message() {
        let server = OneShotServer::start_json(
            503,
            r#"{"error":{"message":"model overloaded"}}"#,
        )
        .await;
        let classifier =
            OpenAiClassifier::with_base_url("sk-test", "qwen-vl-plus", &server.url("/v1")).unwrap();

        let err = classifier
            .classify("https://cdn/a.jpg", "six panels?")
            .await
            .unwrap_err();

        match err {
            AppError::ClassifierError {
                message,
                status_code,
            } => {
                assert_eq!(status_code, 503);
                assert_eq!(message, "model overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = OneShotServer::start_json(200, r#"{"choices":[]}"#).await;
        let classifier =
            OpenAiClassifier::with_base_url("sk-test", "qwen-vl-plus", &server.url("/v1")).unwrap();

        let err = classifier
            .classify("https://cdn/a.jpg", "six panels?")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ClassifierError { .. }));
    }
}
