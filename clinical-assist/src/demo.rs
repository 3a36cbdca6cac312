//! Canned walkthroughs that run without a model.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::error;

use crate::attachment::AttachmentKind;
use crate::error::{AssistError, Result};
use crate::models::AnalysisResult;

const FIXTURE: &str = include_str!("../fixtures/demo_scenarios.json");

static SCENARIOS: LazyLock<Vec<DemoScenario>> =
    LazyLock::new(|| match serde_json::from_str(FIXTURE) {
        Ok(scenarios) => scenarios,
        Err(e) => {
            error!(error = %e, "Embedded demo scenarios failed to parse");
            Vec::new()
        }
    });

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockAttachment {
    pub name: String,
    pub kind: AttachmentKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponse {
    pub simple: String,
    pub actions: Vec<String>,
    pub technical: String,
}

impl MockResponse {
    /// Render as a single assistant message.
    pub fn to_markdown(&self) -> String {
        let mut text = self.simple.clone();
        if !self.actions.is_empty() {
            text.push_str("\n\n**What You Should Do:**\n");
            for action in &self.actions {
                text.push_str("- ");
                text.push_str(action);
                text.push('\n');
            }
        }
        if !self.technical.trim().is_empty() {
            text.push_str("\n\n**Technical Details:**\n");
            text.push_str(self.technical.trim());
        }
        text.trim_end().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PharmacyPrice {
    pub name: String,
    pub price: f64,
    pub url: String,
    #[serde(default)]
    pub is_cheapest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineDetails {
    pub name: String,
    pub strength: String,
    pub quantity: String,
    pub savings: f64,
    pub prices: Vec<PharmacyPrice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoScenario {
    pub id: String,
    pub title: String,
    pub description: String,
    pub prompt: String,
    pub mock_attachment: MockAttachment,
    pub mock_analysis: AnalysisResult,
    pub mock_response: MockResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medicine: Option<MedicineDetails>,
}

pub fn scenarios() -> &'static [DemoScenario] {
    &SCENARIOS
}

pub fn find(id: &str) -> Result<&'static DemoScenario> {
    scenarios()
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| AssistError::ScenarioNotFound(id.to_string()))
}
