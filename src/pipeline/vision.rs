//! Extraction client: sends one image plus instructions to a remote
//! multimodal chat-completions endpoint and returns the raw text answer.
//!
//! Endpoint and auth come from `ScanConfig`, resolved once at startup:
//! - **Bearer**: direct call with `Authorization: Bearer <key>`
//! - **Proxy**: trusted server-side proxy, no auth header

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::parser::JsonExtractError;
use super::preprocess::EncodedImage;
use super::ScanError;
use crate::config::{EndpointAuth, ScanConfig};

/// Longest error body kept from a failed API call.
const MAX_ERROR_BODY: usize = 500;

/// One extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionRequest {
    pub prompt: String,
    pub image: EncodedImage,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Vision model abstraction (allows mocking).
pub trait VisionClient: Send + Sync {
    /// Return the raw text of the model's first choice.
    fn complete(
        &self,
        request: &VisionRequest,
    ) -> impl Future<Output = Result<String, ScanError>> + Send;
}

// ──────────────────────────────────────────────
// Wire types (chat-completions API)
// ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub(crate) fn chat_request<'a>(model: &'a str, request: &'a VisionRequest) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::Text {
                    text: &request.prompt,
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: request.image.data_url(),
                        detail: "high",
                    },
                },
            ],
        }],
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    }
}

// ──────────────────────────────────────────────
// HttpVisionClient
// ──────────────────────────────────────────────

/// Production client for an OpenAI-compatible chat-completions endpoint.
pub struct HttpVisionClient {
    client: reqwest::Client,
    endpoint: String,
    auth: EndpointAuth,
    model: String,
    timeout: Duration,
}

impl HttpVisionClient {
    pub fn new(config: &ScanConfig) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ScanError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth: config.auth.clone(),
            model: config.model.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_send_error(&self, e: reqwest::Error) -> ScanError {
        if e.is_timeout() {
            ScanError::Timeout(self.timeout)
        } else if e.is_connect() {
            ScanError::Network(format!(
                "Could not reach the vision endpoint at {}",
                self.endpoint
            ))
        } else {
            ScanError::Network(e.to_string())
        }
    }
}

impl VisionClient for HttpVisionClient {
    async fn complete(&self, request: &VisionRequest) -> Result<String, ScanError> {
        let body = chat_request(&self.model, request);

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let EndpointAuth::Bearer(token) = &self.auth {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ScanError::Unauthorized);
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(ScanError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(self.timeout)
            } else {
                ScanError::Parse(JsonExtractError::Malformed(format!(
                    "Unexpected API response: {e}"
                )))
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ScanError::EmptyResponse)
    }
}

// ──────────────────────────────────────────────
// MockVisionClient (testing)
// ──────────────────────────────────────────────

/// Scripted vision client for tests: fixed answer or error, optional delay,
/// and a record of every request it saw.
pub struct MockVisionClient {
    outcome: Result<String, ScanError>,
    delay: Option<Duration>,
    requests: Mutex<Vec<VisionRequest>>,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self {
            outcome: Ok(response.to_string()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ScanError) -> Self {
        Self {
            outcome: Err(error),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<VisionRequest> {
        self.requests
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

impl VisionClient for MockVisionClient {
    async fn complete(&self, request: &VisionRequest) -> Result<String, ScanError> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    fn sample_request() -> VisionRequest {
        VisionRequest {
            prompt: "Read the tag".into(),
            image: EncodedImage {
                base64: "QUJD".into(),
                mime: "image/jpeg".into(),
            },
            max_tokens: 1000,
            temperature: 0.1,
        }
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn client_for(addr: SocketAddr, auth: EndpointAuth, timeout: Duration) -> HttpVisionClient {
        let config = ScanConfig::new(format!("http://{addr}/v1/chat/completions"), auth)
            .with_timeout(timeout);
        HttpVisionClient::new(&config).unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    // ── Request shape ──

    #[test]
    fn request_body_matches_chat_contract() {
        let request = sample_request();
        let body = serde_json::to_value(chat_request("gpt-4o", &request)).unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 1000);
        let message = &body["messages"][0];
        assert_eq!(message["role"], "user");
        assert_eq!(message["content"][0]["type"], "text");
        assert_eq!(message["content"][0]["text"], "Read the tag");
        assert_eq!(message["content"][1]["type"], "image_url");
        assert_eq!(
            message["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
        assert_eq!(message["content"][1]["image_url"]["detail"], "high");
    }

    // ── HTTP behaviour ──

    #[tokio::test]
    async fn returns_first_choice_content() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(completion("Here you go: {\"markNumber\": \"H105\"}")) }),
        );
        let addr = serve(app).await;
        let client = client_for(addr, EndpointAuth::Proxy, Duration::from_secs(5));

        let text = client.complete(&sample_request()).await.unwrap();
        assert_eq!(text, "Here you go: {\"markNumber\": \"H105\"}");
    }

    #[tokio::test]
    async fn bearer_header_sent_in_direct_mode() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string();
                Json(completion(&auth))
            }),
        );
        let addr = serve(app).await;

        let direct = client_for(addr, EndpointAuth::Bearer("sk-test".into()), Duration::from_secs(5));
        assert_eq!(direct.complete(&sample_request()).await.unwrap(), "Bearer sk-test");

        let proxied = client_for(addr, EndpointAuth::Proxy, Duration::from_secs(5));
        assert_eq!(proxied.complete(&sample_request()).await.unwrap(), "none");
    }

    #[tokio::test]
    async fn unauthorized_is_remapped() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (AxumStatus::UNAUTHORIZED, "invalid api key") }),
        );
        let addr = serve(app).await;
        let client = client_for(addr, EndpointAuth::Bearer("bad".into()), Duration::from_secs(5));

        let err = client.complete(&sample_request()).await.unwrap_err();
        assert_eq!(err, ScanError::Unauthorized);
    }

    #[tokio::test]
    async fn server_error_carries_status_and_body() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let addr = serve(app).await;
        let client = client_for(addr, EndpointAuth::Proxy, Duration::from_secs(5));

        let err = client.complete(&sample_request()).await.unwrap_err();
        assert_eq!(
            err,
            ScanError::Api {
                status: 503,
                body: "overloaded".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_content_is_empty_response() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(serde_json::json!({"choices": []})) }),
        );
        let addr = serve(app).await;
        let client = client_for(addr, EndpointAuth::Proxy, Duration::from_secs(5));

        let err = client.complete(&sample_request()).await.unwrap_err();
        assert_eq!(err, ScanError::EmptyResponse);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_distinctly() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(completion("{}"))
            }),
        );
        let addr = serve(app).await;
        let client = client_for(addr, EndpointAuth::Proxy, Duration::from_millis(200));

        let err = client.complete(&sample_request()).await.unwrap_err();
        assert_eq!(err, ScanError::Timeout(Duration::from_millis(200)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let config = ScanConfig::new("http://127.0.0.1:1/v1/chat/completions", EndpointAuth::Proxy);
        let client = HttpVisionClient::new(&config).unwrap();

        let err = client.complete(&sample_request()).await.unwrap_err();
        assert!(matches!(err, ScanError::Network(_)));
        assert!(!err.to_string().contains("timed out"));
    }

    // ── Mock ──

    #[tokio::test]
    async fn mock_records_requests() {
        let mock = MockVisionClient::new("{}");
        mock.complete(&sample_request()).await.unwrap();
        let seen = mock.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].prompt, "Read the tag");
    }

    #[tokio::test]
    async fn mock_failing_returns_error() {
        let mock = MockVisionClient::failing(ScanError::Unauthorized);
        assert_eq!(
            mock.complete(&sample_request()).await.unwrap_err(),
            ScanError::Unauthorized
        );
    }
}
