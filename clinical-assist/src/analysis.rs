use std::sync::Arc;
use tracing::{error, info, warn};

use crate::attachment::AnalysisRequest;
use crate::client::{GeminiClient, GenerationBackend};
use crate::config::ClientConfig;
use crate::error::{AssistError, Result};
use crate::models::AnalysisResult;
use crate::prompts::ANALYSIS_SYSTEM_PROMPT;
use crate::protocol::{Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::schema::analysis_response_schema;

/// Model-facing knobs shared by analysis and chat.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub thinking_budget: i32,
    pub retry: RetryPolicy,
}

impl From<&ClientConfig> for ModelSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            model: config.model.clone(),
            thinking_budget: config.thinking_budget,
            retry: config.retry.clone(),
        }
    }
}

/// Runs structured analyses of uploaded medical files.
#[derive(Clone)]
pub struct Analyzer {
    backend: Arc<dyn GenerationBackend>,
    settings: ModelSettings,
    executor: RetryExecutor,
}

impl Analyzer {
    pub fn new(backend: Arc<dyn GenerationBackend>, settings: ModelSettings) -> Self {
        let executor = RetryExecutor::new(settings.retry.clone());
        Self {
            backend,
            settings,
            executor,
        }
    }

    /// Build an analyzer backed by [`GeminiClient`]. A missing credential fails here,
    /// before any request exists.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = GeminiClient::new(config)?;
        Ok(Self::new(Arc::new(client), ModelSettings::from(config)))
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Assemble the provider payload: instructions, encoded attachments, and the
    /// output schema. Size ceilings are enforced here.
    pub fn build_request(&self, request: &AnalysisRequest) -> Result<GenerateContentRequest> {
        let mut parts = vec![Part::text(ANALYSIS_SYSTEM_PROMPT)];
        parts.extend(request.build_parts()?);

        let config = GenerationConfig::structured(analysis_response_schema())
            .with_thinking_budget(self.settings.thinking_budget);
        Ok(GenerateContentRequest::new(vec![Content::user(parts)]).with_generation_config(config))
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        let payload = self.build_request(request)?;
        info!(
            attachments = request.attachments().count(),
            bytes = request.total_bytes(),
            model = %self.settings.model,
            "Starting medical case analysis"
        );

        let response = self
            .executor
            .execute(|| self.backend.generate(&self.settings.model, &payload))
            .await
            .inspect_err(|e| error!(kind = e.kind(), error = %e, "Analysis request failed"))?;

        let result = parse_analysis(&response)
            .inspect_err(|e| warn!(kind = e.kind(), error = %e, "Analysis response rejected"))?;

        info!(
            findings = result.findings.len(),
            annotations = result.annotations.len(),
            risk_level = ?result.risk_level,
            "Medical case analysis completed"
        );
        Ok(result)
    }
}

/// Interpret a generation response as an [`AnalysisResult`].
pub fn parse_analysis(response: &GenerateContentResponse) -> Result<AnalysisResult> {
    if let Some(reason) = response.safety_block() {
        return Err(AssistError::ContentPolicyRejected(reason.to_string()));
    }
    let text = response
        .text()
        .ok_or_else(|| AssistError::EmptyResult("AI returned empty analysis".to_string()))?;
    parse_analysis_text(&text)
}

pub fn parse_analysis_text(text: &str) -> Result<AnalysisResult> {
    let json = strip_code_fence(text);
    if json.is_empty() {
        return Err(AssistError::EmptyResult(
            "AI returned empty analysis".to_string(),
        ));
    }
    let result: AnalysisResult = serde_json::from_str(json)
        .map_err(|e| AssistError::EmptyResult(format!("unparseable analysis: {}", e)))?;
    result.validate()
}

/// Models occasionally wrap JSON in a markdown fence despite the mime type.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::Attachment;
    use crate::models::{RiskLevel, Severity};
    use crate::test_support::{ScriptedBackend, fast_settings, sample_result_json};
    use serde_json::json;

    fn report() -> Attachment {
        Attachment::from_bytes("labs.pdf", "application/pdf", b"%PDF-1.4".to_vec()).unwrap()
    }

    fn analyzer(backend: Arc<ScriptedBackend>) -> Analyzer {
        Analyzer::new(backend, fast_settings())
    }

    #[tokio::test]
    async fn test_analysis_parses_structured_response() {
        let backend = ScriptedBackend::new(vec![Ok(GenerateContentResponse::from_text(
            sample_result_json().to_string(),
        ))]);
        let result = analyzer(backend.clone())
            .analyze(&AnalysisRequest::new().with_report(report()))
            .await
            .unwrap();

        assert_eq!(result.patient_name, "John Doe");
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert_eq!(result.findings[0].severity, Severity::High);
        assert_eq!(backend.calls(), 1);

        let sent = &backend.requests()[0];
        let config = sent.generation_config.as_ref().unwrap();
        assert_eq!(config.response_mime_type.as_deref(), Some("application/json"));
        assert_eq!(config.thinking_config.as_ref().unwrap().thinking_budget, 16000);
        assert_eq!(sent.contents[0].parts[0].as_text(), Some(ANALYSIS_SYSTEM_PROMPT));
        assert_eq!(sent.contents[0].parts[1].inline_mime_type(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_oversized_attachment_never_reaches_backend() {
        let backend = ScriptedBackend::new(vec![]);
        let big = Attachment::from_bytes(
            "scan.png",
            "image/png",
            vec![0u8; 50 * 1024 * 1024 + 1],
        )
        .unwrap();

        let err = analyzer(backend.clone())
            .analyze(&AnalysisRequest::new().with_image(big))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistError::SizeLimitExceeded { ref file, .. } if file == "scan.png"));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let backend = ScriptedBackend::new(vec![
            Err(AssistError::TransportFailure("failed to fetch".into())),
            Ok(GenerateContentResponse::from_text(sample_result_json().to_string())),
        ]);
        let result = analyzer(backend.clone())
            .analyze(&AnalysisRequest::new().with_report(report()))
            .await;

        assert!(result.is_ok());
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_response_is_empty_result() {
        let backend = ScriptedBackend::new(vec![Ok(GenerateContentResponse::default())]);
        let err = analyzer(backend.clone())
            .analyze(&AnalysisRequest::new().with_report(report()))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistError::EmptyResult(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_safety_rejection_is_not_retried() {
        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({ "promptFeedback": { "blockReason": "SAFETY" } }))
                .unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok(blocked),
            Ok(GenerateContentResponse::from_text(sample_result_json().to_string())),
        ]);
        let err = analyzer(backend.clone())
            .analyze(&AnalysisRequest::new().with_report(report()))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistError::ContentPolicyRejected(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_safety_error_from_backend_is_not_retried() {
        let backend = ScriptedBackend::new(vec![
            Err(AssistError::ContentPolicyRejected("blocked: SAFETY".into())),
            Ok(GenerateContentResponse::from_text(sample_result_json().to_string())),
        ]);
        let err = analyzer(backend.clone())
            .analyze(&AnalysisRequest::new().with_report(report()))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistError::ContentPolicyRejected(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn test_missing_credential_fails_synchronously() {
        let err = Analyzer::from_config(&ClientConfig::new("")).err().unwrap();
        assert!(matches!(err, AssistError::ConfigurationMissing(_)));
    }

    #[test]
    fn test_fenced_json_is_accepted() {
        let text = format!("```json\n{}\n```", sample_result_json());
        assert!(parse_analysis_text(&text).is_ok());
    }

    #[test]
    fn test_annotation_without_region_keeps_analysis() {
        let mut value = sample_result_json();
        value["annotations"] = json!([{ "label": "Note", "box2d": [] }]);

        let result = parse_analysis_text(&value.to_string()).unwrap();
        assert_eq!(result.patient_id, "MRN-99281");
        assert_eq!(result.annotations[0].label, "Note");
        assert!(result.annotations[0].box2d.is_none());
    }

    #[test]
    fn test_garbage_text_is_empty_result() {
        assert!(matches!(
            parse_analysis_text("I could not read the file."),
            Err(AssistError::EmptyResult(_))
        ));
        assert!(matches!(
            parse_analysis_text("   "),
            Err(AssistError::EmptyResult(_))
        ));
    }
}
