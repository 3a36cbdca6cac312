use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::analysis::ModelSettings;
use crate::client::GenerationBackend;
use crate::demo;
use crate::error::{AssistError, Result};
use crate::models::AnalysisResult;
use crate::protocol::{GenerateContentRequest, GenerateContentResponse};
use crate::retry::RetryPolicy;

/// Backend that replays a fixed list of outcomes and records what it was sent.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<GenerateContentResponse>>>,
    requests: Mutex<Vec<GenerateContentRequest>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<GenerateContentResponse>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerateContentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        _model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AssistError::EmptyResult("script exhausted".to_string())))
    }
}

pub fn fast_settings() -> ModelSettings {
    ModelSettings {
        model: "gemini-test".to_string(),
        thinking_budget: 16000,
        retry: RetryPolicy::new().with_base_delay(Duration::from_millis(1)),
    }
}

/// The blood-work analysis: John Doe, MRN-99281, medium risk.
pub fn sample_result() -> AnalysisResult {
    demo::find("bloodwork").unwrap().mock_analysis.clone()
}

pub fn sample_result_json() -> serde_json::Value {
    serde_json::to_value(sample_result()).unwrap()
}

/// An analysis that found nothing, as for a blank upload.
pub fn no_findings_result() -> AnalysisResult {
    AnalysisResult {
        findings: Vec::new(),
        ..sample_result()
    }
}
