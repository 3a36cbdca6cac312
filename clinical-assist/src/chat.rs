use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analysis::ModelSettings;
use crate::client::GenerationBackend;
use crate::error::Result;
use crate::models::{AnalysisResult, ChatTurn, Role};
use crate::prompts::{
    DEMO_MODE_REPLY, EMPTY_REPLY_FALLBACK, NO_CONTEXT, PRESCRIPTION_REFUSAL,
    chat_system_instruction,
};
use crate::protocol::{Content, GenerateContentRequest, Part, Tool};
use crate::retry::RetryExecutor;

pub mod guardrails {
    const PRESCRIPTION_TERMS: &[&str] = &["prescribe", "prescription"];
    const EMERGENCY_TERMS: &[&str] = &["suicide", "kill myself", "chest pain", "severe bleeding"];

    pub fn asks_for_prescription(message: &str) -> bool {
        let lower = message.to_lowercase();
        PRESCRIPTION_TERMS.iter().any(|t| lower.contains(t))
    }

    /// Messages that should prompt the user to contact emergency services.
    pub fn detect_emergency(message: &str) -> bool {
        let lower = message.to_lowercase();
        EMERGENCY_TERMS.iter().any(|t| lower.contains(t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Model,
    PrescriptionRefusal,
    DemoMode,
    Scenario,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
    pub kind: ReplyKind,
    pub emergency: bool,
}

/// Conversational assistant grounded on the latest analysis.
///
/// Without a backend it answers in demo mode instead of failing.
#[derive(Clone)]
pub struct ChatAssistant {
    backend: Option<Arc<dyn GenerationBackend>>,
    settings: ModelSettings,
    executor: RetryExecutor,
}

impl ChatAssistant {
    pub fn new(backend: Option<Arc<dyn GenerationBackend>>, settings: ModelSettings) -> Self {
        let executor = RetryExecutor::new(settings.retry.clone());
        Self {
            backend,
            settings,
            executor,
        }
    }

    pub fn is_demo(&self) -> bool {
        self.backend.is_none()
    }

    /// Contents for a chat turn: system instruction, prior turns, then the new message.
    pub fn build_request(
        &self,
        history: &[ChatTurn],
        message: &str,
        context: Option<&AnalysisResult>,
    ) -> GenerateContentRequest {
        let context_str = match context.filter(|c| c.has_findings()) {
            Some(analysis) => {
                serde_json::to_string(analysis).unwrap_or_else(|_| NO_CONTEXT.to_string())
            }
            None => NO_CONTEXT.to_string(),
        };

        let mut contents = Vec::with_capacity(history.len() + 2);
        contents.push(Content::user(vec![Part::text(chat_system_instruction(
            &context_str,
        ))]));
        contents.extend(history.iter().map(|turn| {
            let parts = vec![Part::text(turn.text.clone())];
            match turn.role {
                Role::User => Content::user(parts),
                Role::Assistant => Content::model(parts),
            }
        }));
        contents.push(Content::user(vec![Part::text(message)]));

        GenerateContentRequest::new(contents).with_tool(Tool::google_search())
    }

    pub async fn reply(
        &self,
        history: &[ChatTurn],
        message: &str,
        context: Option<&AnalysisResult>,
    ) -> Result<ChatReply> {
        let emergency = guardrails::detect_emergency(message);
        if emergency {
            warn!("Emergency language detected in chat message");
        }

        let Some(backend) = &self.backend else {
            return Ok(ChatReply {
                text: DEMO_MODE_REPLY.to_string(),
                kind: ReplyKind::DemoMode,
                emergency,
            });
        };

        if guardrails::asks_for_prescription(message) {
            info!("Prescription request refused without model call");
            return Ok(ChatReply {
                text: PRESCRIPTION_REFUSAL.to_string(),
                kind: ReplyKind::PrescriptionRefusal,
                emergency,
            });
        }

        let request = self.build_request(history, message, context);
        info!(
            history = history.len(),
            has_context = context.is_some_and(AnalysisResult::has_findings),
            "Generating chat reply"
        );
        let response = self
            .executor
            .execute(|| backend.generate(&self.settings.model, &request))
            .await?;

        Ok(match response.text() {
            Some(text) => ChatReply {
                text,
                kind: ReplyKind::Model,
                emergency,
            },
            None => ChatReply {
                text: EMPTY_REPLY_FALLBACK.to_string(),
                kind: ReplyKind::Fallback,
                emergency,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistError;
    use crate::protocol::GenerateContentResponse;
    use crate::test_support::{ScriptedBackend, fast_settings, no_findings_result, sample_result};

    fn assistant(backend: Arc<ScriptedBackend>) -> ChatAssistant {
        ChatAssistant::new(Some(backend), fast_settings())
    }

    #[tokio::test]
    async fn test_prescription_request_skips_model() {
        let backend = ScriptedBackend::new(vec![]);
        let reply = assistant(backend.clone())
            .reply(&[], "Can you PRESCRIBE something for this?", None)
            .await
            .unwrap();

        assert_eq!(reply.kind, ReplyKind::PrescriptionRefusal);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_demo_mode_without_backend() {
        let reply = ChatAssistant::new(None, fast_settings())
            .reply(&[], "What does my X-ray show?", None)
            .await
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::DemoMode);
        assert_eq!(reply.text, DEMO_MODE_REPLY);
    }

    #[tokio::test]
    async fn test_demo_mode_answers_before_prescription_guard() {
        let reply = ChatAssistant::new(None, fast_settings())
            .reply(&[], "Please write me a prescription", None)
            .await
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::DemoMode);
        assert_eq!(reply.text, DEMO_MODE_REPLY);
    }

    #[tokio::test]
    async fn test_history_roles_and_context() {
        let backend = ScriptedBackend::new(vec![Ok(GenerateContentResponse::from_text(
            "Hello John Doe,",
        ))]);
        let history = vec![
            ChatTurn::user("Analyze my labs"),
            ChatTurn::assistant("Your glucose is high."),
        ];
        let context = sample_result();

        let reply = assistant(backend.clone())
            .reply(&history, "Is that dangerous?", Some(&context))
            .await
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::Model);
        assert_eq!(reply.text, "Hello John Doe,");

        let sent = &backend.requests()[0];
        let roles: Vec<_> = sent
            .contents
            .iter()
            .map(|c| c.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "user", "model", "user"]);
        assert!(sent.contents[0].parts[0].as_text().unwrap().contains("MRN-99281"));
        assert_eq!(sent.contents[3].parts[0].as_text(), Some("Is that dangerous?"));
        assert_eq!(sent.tools.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_context_without_findings_is_not_sent() {
        let backend =
            ScriptedBackend::new(vec![Ok(GenerateContentResponse::from_text("General advice"))]);
        let empty = no_findings_result();
        assistant(backend.clone())
            .reply(&[], "How do I lower cholesterol?", Some(&empty))
            .await
            .unwrap();

        let instruction = backend.requests()[0].contents[0].parts[0]
            .as_text()
            .unwrap()
            .to_string();
        assert!(instruction.contains(NO_CONTEXT));
    }

    #[tokio::test]
    async fn test_empty_reply_uses_fallback() {
        let backend = ScriptedBackend::new(vec![Ok(GenerateContentResponse::default())]);
        let reply = assistant(backend).reply(&[], "Hello", None).await.unwrap();
        assert_eq!(reply.kind, ReplyKind::Fallback);
        assert_eq!(reply.text, EMPTY_REPLY_FALLBACK);
    }

    #[tokio::test]
    async fn test_backend_errors_propagate() {
        let backend =
            ScriptedBackend::new(vec![Err(AssistError::RateLimited("quota".to_string()))]);
        let err = assistant(backend.clone())
            .reply(&[], "Hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::RateLimited(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_emergency_flag() {
        let backend = ScriptedBackend::new(vec![Ok(GenerateContentResponse::from_text(
            "Call emergency services now.",
        ))]);
        let reply = assistant(backend)
            .reply(&[], "I have crushing chest pain", None)
            .await
            .unwrap();
        assert!(reply.emergency);
        assert!(!guardrails::detect_emergency("my knee hurts"));
    }
}
