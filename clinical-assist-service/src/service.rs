use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{Next, from_fn},
    response::{Json, Response},
    routing::{get, post},
};
use clinical_assist::{
    AnalysisRequest, AnalysisResult, Analyzer, AssistError, ChatAssistant,
    ClientConfig, Conversation, ConversationRunner, ConversationSummary, GeminiClient,
    GenerationBackend, InMemoryConversationStorage, ModelSettings, TurnInput, TurnOutcome, demo,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::models::{ErrorResponse, ScenarioSummary, UploadForm, UploadedFile};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Room for one upload of every kind at its ceiling, plus form overhead.
pub const MAX_BODY_BYTES: usize = 220 * 1024 * 1024;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn status_for(err: &AssistError) -> StatusCode {
    match err {
        AssistError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        AssistError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        AssistError::FileProcessingFailed { .. } | AssistError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        AssistError::ContentPolicyRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AssistError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        AssistError::ConfigurationMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
        AssistError::TransportFailure(_)
        | AssistError::ServerFault { .. }
        | AssistError::EmptyResult(_)
        | AssistError::AuthenticationFailed { .. } => StatusCode::BAD_GATEWAY,
        AssistError::ConversationNotFound(_) | AssistError::ScenarioNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        AssistError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn assist_error(err: AssistError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(kind = err.kind(), status = status.as_u16(), error = %err, "Request failed");
    } else {
        warn!(kind = err.kind(), status = status.as_u16(), error = %err, "Request rejected");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            kind: err.kind().to_string(),
        }),
    )
}

fn bad_request_error(message: impl Into<String>) -> ApiError {
    assist_error(AssistError::InvalidRequest(message.into()))
}

#[derive(Clone)]
pub struct AppState {
    pub runner: ConversationRunner,
}

impl AppState {
    pub fn new(runner: ConversationRunner) -> Self {
        Self { runner }
    }

    /// Without an API key the service still starts: analysis answers 503 and
    /// chat runs in demo mode.
    pub fn from_config(config: &ClientConfig) -> Self {
        let settings = ModelSettings::from(config);
        let backend = match GeminiClient::new(config) {
            Ok(client) => {
                info!(model = %config.model, base_url = %config.base_url, "Gemini client configured");
                let backend: Arc<dyn GenerationBackend> = Arc::new(client);
                Some(backend)
            }
            Err(e) => {
                warn!(error = %e, "Running in demo mode");
                None
            }
        };
        let analyzer = backend
            .clone()
            .map(|backend| Analyzer::new(backend, settings.clone()));
        let chat = ChatAssistant::new(backend, settings);

        Self::new(ConversationRunner::new(
            Arc::new(InMemoryConversationStorage::new()),
            analyzer,
            chat,
        ))
    }
}

pub fn create_app(config: &ClientConfig) -> Router {
    build_router(AppState::from_config(config))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/demo/scenarios", get(list_scenarios))
        .route("/analyze", post(analyze))
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/conversations/{id}/messages", post(post_message))
        .route("/conversations/{id}/demo/{scenario_id}", post(play_scenario))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(from_fn(correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Tag every request with a correlation id, reusing the caller's when present.
async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header = HeaderValue::from_str(&correlation_id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert(CORRELATION_HEADER, value.clone());
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    if let Some(value) = header {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Clinical Assist Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Multimodal medical case analysis and grounded patient chat",
        "endpoints": {
            "POST /analyze": "Analyze uploaded report, image and video files",
            "POST /conversations": "Start a conversation",
            "GET /conversations": "List conversations",
            "GET /conversations/{id}": "Get a conversation with its history",
            "DELETE /conversations/{id}": "Delete a conversation",
            "POST /conversations/{id}/messages": "Send a message with optional files",
            "POST /conversations/{id}/demo/{scenario_id}": "Play a demo scenario",
            "GET /demo/scenarios": "List demo scenarios",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "mode": if state.runner.is_demo() { "demo" } else { "live" },
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_scenarios() -> Json<Vec<ScenarioSummary>> {
    Json(demo::scenarios().iter().map(ScenarioSummary::from).collect())
}

/// Split a multipart body into text fields and uploaded files.
async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request_error(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let mime_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    assist_error(AssistError::FileProcessingFailed {
                        file: file_name.clone(),
                        reason: e.to_string(),
                    })
                })?;
                // Browsers send an unnamed empty part for an untouched file input.
                if file_name.is_empty() && bytes.is_empty() {
                    debug!(field = %name, "Skipping empty file part");
                    continue;
                }
                debug!(field = %name, file = %file_name, mime_type = %mime_type, size = bytes.len(), "Received upload");
                form.files.push(UploadedFile {
                    field: name,
                    file_name,
                    mime_type,
                    bytes: bytes.to_vec(),
                });
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request_error(format!("unreadable field '{}': {}", name, e)))?;
                form.fields.insert(name, value);
            }
        }
    }
    Ok(form)
}

async fn analyze(State(state): State<AppState>, multipart: Multipart) -> ApiResult<AnalysisResult> {
    let analyzer = state.runner.analyzer().ok_or_else(|| {
        assist_error(AssistError::ConfigurationMissing(
            "GEMINI_API_KEY is not set".to_string(),
        ))
    })?;

    let form = read_form(multipart).await?;
    let instructions = form.field("instructions").map(str::to_string);
    let attachments = form
        .files
        .into_iter()
        .map(UploadedFile::into_slotted_attachment)
        .collect::<clinical_assist::Result<Vec<_>>>()
        .map_err(assist_error)?;
    let mut request = AnalysisRequest::from_attachments(attachments).map_err(assist_error)?;
    if let Some(instructions) = instructions {
        request = request.with_instructions(instructions);
    }

    info!(attachments = request.attachments().count(), "Analysis requested");
    analyzer.analyze(&request).await.map(Json).map_err(assist_error)
}

async fn create_conversation(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conversation = state.runner.create().await.map_err(assist_error)?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn list_conversations(State(state): State<AppState>) -> ApiResult<Vec<ConversationSummary>> {
    state.runner.list().await.map(Json).map_err(assist_error)
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Conversation> {
    state.runner.get(&id).await.map(Json).map_err(assist_error)
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.runner.delete(&id).await.map_err(assist_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<TurnOutcome> {
    let form = read_form(multipart).await?;
    let message = form.field("message").unwrap_or_default().to_string();
    let attachments = form
        .files
        .into_iter()
        .map(UploadedFile::into_attachment)
        .collect::<clinical_assist::Result<Vec<_>>>()
        .map_err(assist_error)?;
    let input = TurnInput {
        message,
        attachments,
    };
    info!(conversation_id = %id, attachments = input.attachments.len(), "Message received");

    state
        .runner
        .run_turn(&id, input)
        .await
        .map(Json)
        .map_err(assist_error)
}

async fn play_scenario(
    State(state): State<AppState>,
    Path((id, scenario_id)): Path<(String, String)>,
) -> ApiResult<TurnOutcome> {
    state
        .runner
        .run_demo_turn(&id, &scenario_id)
        .await
        .map(Json)
        .map_err(assist_error)
}
