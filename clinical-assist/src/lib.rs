//! Core of a clinical assistant: multimodal case analysis and grounded chat on
//! top of a remote generation service, with bounded retries.

pub mod analysis;
pub mod attachment;
pub mod chat;
pub mod client;
pub mod config;
pub mod conversation;
pub mod demo;
pub mod error;
pub mod models;
pub mod prompts;
pub mod protocol;
pub mod retry;
pub mod schema;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use analysis::{Analyzer, ModelSettings};
pub use attachment::{AnalysisRequest, Attachment, AttachmentKind};
pub use chat::{ChatAssistant, ChatReply, ReplyKind};
pub use client::{GeminiClient, GenerationBackend};
pub use config::ClientConfig;
pub use conversation::{
    Conversation, ConversationRunner, ConversationStorage, ConversationSummary,
    InMemoryConversationStorage, TurnInput, TurnOutcome,
};
pub use demo::DemoScenario;
pub use error::{AssistError, Result};
pub use models::{
    AnalysisResult, Annotation, BoundingBox, ChatTurn, Finding, MetricTrend, Modality,
    PatientVitals, RiskLevel, Role, Severity, Trend,
};
pub use retry::{RetryExecutor, RetryPolicy};
