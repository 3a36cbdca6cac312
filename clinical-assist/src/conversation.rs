//! Conversations: an append-only chat history plus the analysis it is grounded on.
//!
//! [`ConversationRunner`] wraps the usual _load → execute → save_ cycle for one
//! turn and serializes turns per conversation, so replies land in the order the
//! messages were submitted. Different conversations proceed independently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::Analyzer;
use crate::attachment::{AnalysisRequest, Attachment};
use crate::chat::{ChatAssistant, ChatReply, ReplyKind, guardrails};
use crate::demo::{self, MedicineDetails};
use crate::error::{AssistError, Result};
use crate::models::{AnalysisResult, ChatTurn, Role};
use crate::prompts::{ANALYZE_UPLOADS_QUERY, CONNECTION_ERROR_REPLY};

const DEFAULT_TITLE: &str = "Medical Analysis";
const TITLE_CHARS: usize = 40;
const PREVIEW_CHARS: usize = 60;
/// Messages shorter than this accompanying an upload are treated as "explain it".
const MIN_QUERY_CHARS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turns: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_analysis: Option<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
            current_analysis: None,
            scenario_id: None,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn::user(text));
        self.updated_at = Utc::now();
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn::assistant(text));
        self.updated_at = Utc::now();
    }

    /// Replace the grounding analysis; earlier ones are not kept.
    pub fn supersede_analysis(&mut self, analysis: AnalysisResult) {
        self.current_analysis = Some(analysis);
        self.updated_at = Utc::now();
    }

    pub fn title(&self) -> String {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| truncate(&t.text, TITLE_CHARS))
            .unwrap_or_else(|| DEFAULT_TITLE.to_string())
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title(),
            preview: self
                .turns
                .last()
                .map(|t| truncate(&t.text, PREVIEW_CHARS))
                .unwrap_or_default(),
            turn_count: self.turns.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trait for storing and retrieving conversations
#[async_trait]
pub trait ConversationStorage: Send + Sync {
    async fn save(&self, conversation: Conversation) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Conversation>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<Conversation>>;
}

#[derive(Default)]
pub struct InMemoryConversationStorage {
    conversations: Arc<DashMap<String, Conversation>>,
}

impl InMemoryConversationStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStorage for InMemoryConversationStorage {
    async fn save(&self, conversation: Conversation) -> Result<()> {
        self.conversations
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.conversations.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        Ok(self
            .conversations
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

/// One user submission: text plus any uploaded files.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub message: String,
    pub attachments: Vec<Attachment>,
}

impl TurnInput {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub reply: ChatReply,
    /// Set only when this turn produced a new analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    /// Pharmacy price comparison attached to a played scenario.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medicine: Option<MedicineDetails>,
}

/// Runs chat turns against stored conversations.
#[derive(Clone)]
pub struct ConversationRunner {
    storage: Arc<dyn ConversationStorage>,
    analyzer: Option<Analyzer>,
    chat: ChatAssistant,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationRunner {
    pub fn new(
        storage: Arc<dyn ConversationStorage>,
        analyzer: Option<Analyzer>,
        chat: ChatAssistant,
    ) -> Self {
        Self {
            storage,
            analyzer,
            chat,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn analyzer(&self) -> Option<&Analyzer> {
        self.analyzer.as_ref()
    }

    pub fn is_demo(&self) -> bool {
        self.chat.is_demo()
    }

    pub async fn create(&self) -> Result<Conversation> {
        let conversation = Conversation::new();
        self.storage.save(conversation.clone()).await?;
        info!(conversation_id = %conversation.id, "Conversation created");
        Ok(conversation)
    }

    pub async fn get(&self, id: &str) -> Result<Conversation> {
        self.storage
            .get(id)
            .await?
            .ok_or_else(|| AssistError::ConversationNotFound(id.to_string()))
    }

    /// Most recently active first.
    pub async fn list(&self) -> Result<Vec<ConversationSummary>> {
        let mut conversations = self.storage.list().await?;
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations.iter().map(Conversation::summary).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let (_guard, _) = self.load_locked(id).await?;
        if !self.storage.delete(id).await? {
            return Err(AssistError::ConversationNotFound(id.to_string()));
        }
        self.locks.remove(id);
        info!(conversation_id = %id, "Conversation deleted");
        Ok(())
    }

    /// Run one turn: record the message, analyze any uploads, reply, persist.
    ///
    /// The conversation is saved even when the turn fails, so the user's
    /// message is never lost.
    pub async fn run_turn(&self, id: &str, input: TurnInput) -> Result<TurnOutcome> {
        let message = input.message.trim().to_string();
        if message.is_empty() && input.attachments.is_empty() {
            return Err(AssistError::InvalidRequest(
                "a message or an attachment is required".to_string(),
            ));
        }
        let request = if input.attachments.is_empty() {
            None
        } else {
            let request = AnalysisRequest::from_attachments(input.attachments)?;
            for attachment in request.attachments() {
                attachment.check_size()?;
            }
            Some(request)
        };

        let (_guard, mut conversation) = self.load_locked(id).await?;
        let outcome = self
            .execute_turn(&mut conversation, message, request)
            .await;
        self.storage.save(conversation).await?;

        outcome
    }

    async fn execute_turn(
        &self,
        conversation: &mut Conversation,
        message: String,
        request: Option<AnalysisRequest>,
    ) -> Result<TurnOutcome> {
        let history_len = conversation.turns.len();
        let user_text = match &request {
            Some(request) if message.is_empty() => {
                let names: Vec<_> = request.attachments().map(|a| a.name.as_str()).collect();
                format!("Uploaded {}", names.join(", "))
            }
            _ => message.clone(),
        };
        conversation.push_user(user_text);

        let analysis = match request {
            Some(request) => {
                let analyzer = self.analyzer.as_ref().ok_or_else(|| {
                    AssistError::ConfigurationMissing(
                        "analysis requires GEMINI_API_KEY".to_string(),
                    )
                })?;
                let result = analyzer.analyze(&request).await.inspect_err(|e| {
                    warn!(conversation_id = %conversation.id, kind = e.kind(), "Turn analysis failed")
                })?;
                conversation.supersede_analysis(result.clone());
                conversation.scenario_id = None;
                Some(result)
            }
            None => None,
        };

        let query = if analysis.is_some() && message.chars().count() < MIN_QUERY_CHARS {
            ANALYZE_UPLOADS_QUERY
        } else {
            message.as_str()
        };

        let reply = match self
            .chat
            .reply(
                &conversation.turns[..history_len],
                query,
                conversation.current_analysis.as_ref(),
            )
            .await
        {
            Ok(reply) => reply,
            // The analysis already succeeded; keep it and answer with a fallback.
            Err(e) if analysis.is_some() => {
                warn!(conversation_id = %conversation.id, kind = e.kind(), error = %e, "Explanation failed after analysis");
                ChatReply {
                    text: CONNECTION_ERROR_REPLY.to_string(),
                    kind: ReplyKind::Fallback,
                    emergency: guardrails::detect_emergency(query),
                }
            }
            Err(e) => return Err(e),
        };
        conversation.push_assistant(reply.text.clone());

        info!(
            conversation_id = %conversation.id,
            turns = conversation.turns.len(),
            reply_kind = ?reply.kind,
            new_analysis = analysis.is_some(),
            "Turn completed"
        );

        Ok(TurnOutcome {
            conversation_id: conversation.id.clone(),
            reply,
            analysis,
            medicine: None,
        })
    }

    /// Play a canned scenario into the conversation without calling the model.
    pub async fn run_demo_turn(&self, id: &str, scenario_id: &str) -> Result<TurnOutcome> {
        let scenario = demo::find(scenario_id)?;

        let (_guard, mut conversation) = self.load_locked(id).await?;
        let text = scenario.mock_response.to_markdown();
        conversation.push_user(scenario.prompt.clone());
        conversation.supersede_analysis(scenario.mock_analysis.clone());
        conversation.scenario_id = Some(scenario.id.clone());
        conversation.push_assistant(text.clone());
        let conversation_id = conversation.id.clone();
        self.storage.save(conversation).await?;

        info!(conversation_id = %conversation_id, scenario = %scenario.id, "Demo turn played");
        Ok(TurnOutcome {
            conversation_id,
            reply: ChatReply {
                text,
                kind: ReplyKind::Scenario,
                emergency: false,
            },
            analysis: Some(scenario.mock_analysis.clone()),
            medicine: scenario.medicine.clone(),
        })
    }

    /// Take the turn lock for an existing conversation and load it under the lock.
    /// Unknown ids are rejected before a lock entry is created.
    async fn load_locked(&self, id: &str) -> Result<(OwnedMutexGuard<()>, Conversation)> {
        self.get(id).await?;
        let guard = self.lock_for(id).lock_owned().await;
        match self.storage.get(id).await? {
            Some(conversation) => Ok((guard, conversation)),
            None => {
                drop(guard);
                self.locks.remove(id);
                Err(AssistError::ConversationNotFound(id.to_string()))
            }
        }
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
