use thiserror::Error;

use crate::attachment::AttachmentKind;

/// Failures raised while building, sending, or interpreting a generation request.
#[derive(Debug, Clone, Error)]
pub enum AssistError {
    #[error("{kind} file '{file}' is {size} bytes, exceeding the {limit} byte limit")]
    SizeLimitExceeded {
        file: String,
        kind: AttachmentKind,
        size: u64,
        limit: u64,
    },

    #[error("File processing failed for '{file}': {reason}")]
    FileProcessingFailed { file: String, reason: String },

    #[error("Unsupported media type '{mime_type}' for file '{file}'")]
    UnsupportedMediaType { file: String, mime_type: String },

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Server fault ({status}): {message}")]
    ServerFault { status: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Content rejected by safety filters: {0}")]
    ContentPolicyRejected(String),

    #[error("Empty or unusable result: {0}")]
    EmptyResult(String),

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Authentication failed ({status}): {message}")]
    AuthenticationFailed { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Demo scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AssistError {
    /// Only transport and server-side faults are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AssistError::TransportFailure(_) | AssistError::ServerFault { .. }
        )
    }

    /// Stable identifier for the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            AssistError::SizeLimitExceeded { .. } => "size_limit_exceeded",
            AssistError::FileProcessingFailed { .. } => "file_processing_failed",
            AssistError::UnsupportedMediaType { .. } => "unsupported_media_type",
            AssistError::TransportFailure(_) => "transport_failure",
            AssistError::ServerFault { .. } => "server_fault",
            AssistError::RateLimited(_) => "rate_limited",
            AssistError::ContentPolicyRejected(_) => "content_policy_rejected",
            AssistError::EmptyResult(_) => "empty_result",
            AssistError::ConfigurationMissing(_) => "configuration_missing",
            AssistError::AuthenticationFailed { .. } => "authentication_failed",
            AssistError::InvalidRequest(_) => "invalid_request",
            AssistError::ConversationNotFound(_) => "conversation_not_found",
            AssistError::ScenarioNotFound(_) => "scenario_not_found",
            AssistError::Storage(_) => "storage",
        }
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            AssistError::SizeLimitExceeded { file, kind, limit, .. } => format!(
                "File \"{}\" is too large. The {} limit is {}MB.",
                file,
                kind,
                limit / (1024 * 1024)
            ),
            AssistError::FileProcessingFailed { file, reason } => {
                format!("File processing failed for \"{}\": {}", file, reason)
            }
            AssistError::UnsupportedMediaType { file, .. } => {
                format!("Unsupported file type for \"{}\".", file)
            }
            AssistError::RateLimited(_) => {
                "System is busy. Please try again in a moment.".to_string()
            }
            AssistError::ContentPolicyRejected(_) => {
                "Content flagged by safety filters. Unable to analyze.".to_string()
            }
            AssistError::ConfigurationMissing(_) => {
                "API Key is missing. Please check your configuration.".to_string()
            }
            AssistError::EmptyResult(_) => "AI returned empty analysis.".to_string(),
            AssistError::TransportFailure(_)
            | AssistError::ServerFault { .. }
            | AssistError::AuthenticationFailed { .. } => {
                "Unable to complete analysis. Please check your internet connection.".to_string()
            }
            AssistError::InvalidRequest(message) => message.clone(),
            AssistError::ConversationNotFound(_) => "Conversation not found.".to_string(),
            AssistError::ScenarioNotFound(_) => "Demo scenario not found.".to_string(),
            AssistError::Storage(_) => "Failed to save conversation.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistError>;
