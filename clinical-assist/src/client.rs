use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error};

use crate::config::ClientConfig;
use crate::error::{AssistError, Result};
use crate::protocol::{GenerateContentRequest, GenerateContentResponse};

/// A remote service able to run one `generateContent` exchange.
///
/// Implementations perform a single attempt; retrying is the caller's job.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse>;
}

/// HTTP client for the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// Fails with [`AssistError::ConfigurationMissing`] when no API key is configured.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if !config.has_api_key() {
            return Err(AssistError::ConfigurationMissing(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AssistError::ConfigurationMissing(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.api_key.trim().to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, model
        )
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = self.endpoint(model);
        debug!(model = %model, contents = request.contents.len(), "Sending generateContent request");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let err = classify_status(status, &body);
            error!(status = status.as_u16(), kind = err.kind(), "Generation request failed");
            return Err(err);
        }

        serde_json::from_str::<GenerateContentResponse>(&body).map_err(|e| {
            AssistError::EmptyResult(format!("undecodable response body: {}", e))
        })
    }
}

fn transport_error(err: reqwest::Error) -> AssistError {
    if err.is_timeout() {
        AssistError::TransportFailure(format!("request timed out: {}", err))
    } else {
        AssistError::TransportFailure(err.to_string())
    }
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Map a non-success HTTP status (and the provider's error body) to an error class.
pub fn classify_status(status: StatusCode, body: &str) -> AssistError {
    let (message, provider_status) = match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.status),
        Err(_) => (body.trim().to_string(), String::new()),
    };
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };
    let code = status.as_u16();

    // The provider reports safety blocks on rejected prompts only in the message.
    if message.contains("SAFETY") {
        return AssistError::ContentPolicyRejected(message);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AssistError::AuthenticationFailed {
            status: code,
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => AssistError::RateLimited(message),
        s if s.is_server_error() => AssistError::ServerFault {
            status: code,
            message,
        },
        _ if provider_status == "RESOURCE_EXHAUSTED" => AssistError::RateLimited(message),
        _ => AssistError::InvalidRequest(format!("{} ({})", message, code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Content, Part};
    use crate::retry::{RetryExecutor, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL: &str = "gemini-test";
    const ENDPOINT: &str = "/v1beta/models/gemini-test:generateContent";

    fn client_for(server: &MockServer) -> GeminiClient {
        let config = ClientConfig::new("test-api-key")
            .with_base_url(server.uri())
            .with_model(MODEL);
        GeminiClient::new(&config).unwrap()
    }

    fn request() -> GenerateContentRequest {
        GenerateContentRequest::new(vec![Content::user(vec![Part::text("hello")])])
    }

    fn error_body(code: u16, message: &str, status: &str) -> serde_json::Value {
        json!({ "error": { "code": code, "message": message, "status": status } })
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = GeminiClient::new(&ClientConfig::new("")).unwrap_err();
        assert!(matches!(err, AssistError::ConfigurationMissing(_)));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "{}"),
            AssistError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "upstream down"),
            AssistError::ServerFault { status: 502, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            AssistError::AuthenticationFailed { status: 401, .. }
        ));
        assert!(matches!(
            classify_status(
                StatusCode::BAD_REQUEST,
                &error_body(400, "Request blocked: SAFETY", "INVALID_ARGUMENT").to_string()
            ),
            AssistError::ContentPolicyRejected(_)
        ));
        assert!(matches!(
            classify_status(
                StatusCode::BAD_REQUEST,
                &error_body(400, "Invalid schema", "INVALID_ARGUMENT").to_string()
            ),
            AssistError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_generate_sends_key_and_parses_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(header("x-goog-api-key", "test-api-key"))
            .and(body_partial_json(json!({
                "contents": [{ "role": "user", "parts": [{ "text": "hello" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "Hi there" }] },
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server).generate(MODEL, &request()).await.unwrap();
        assert_eq!(response.text().as_deref(), Some("Hi there"));
    }

    #[tokio::test]
    async fn test_server_fault_then_success_through_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(error_body(503, "overloaded", "UNAVAILABLE")),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let executor = RetryExecutor::new(
            RetryPolicy::new().with_base_delay(Duration::from_millis(5)),
        );
        let req = request();
        let response = executor
            .execute(|| client.generate(MODEL, &req))
            .await
            .unwrap();
        assert_eq!(response.text().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(error_body(429, "Quota exceeded", "RESOURCE_EXHAUSTED")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let executor = RetryExecutor::new(
            RetryPolicy::new().with_base_delay(Duration::from_millis(5)),
        );
        let req = request();
        let err = executor
            .execute(|| client.generate(MODEL, &req))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // Bind then drop so nothing is listening on the port.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig::new("test-api-key").with_base_url(format!("http://{}", addr));
        let client = GeminiClient::new(&config).unwrap();
        let err = client.generate(MODEL, &request()).await.unwrap_err();
        assert!(matches!(err, AssistError::TransportFailure(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(MODEL, &request())
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::EmptyResult(_)));
    }
}
