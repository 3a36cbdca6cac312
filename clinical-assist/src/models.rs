use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AssistError, Result};

/// Upper bound of the normalized coordinate space used by annotation boxes.
pub const BOX_COORDINATE_MAX: f64 = 1000.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientVitals {
    #[serde(default)]
    pub bp: String,
    #[serde(default)]
    pub heart_rate: String,
    #[serde(default)]
    pub temperature: String,
    #[serde(default)]
    pub spo2: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Input channel a finding was traced back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Report,
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub modality_source: Vec<Modality>,
    pub confidence: f64,
}

/// `[ymin, xmin, ymax, xmax]` in the 0..=1000 normalized space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub ymin: f64,
    pub xmin: f64,
    pub ymax: f64,
    pub xmax: f64,
}

impl From<[f64; 4]> for BoundingBox {
    fn from([ymin, xmin, ymax, xmax]: [f64; 4]) -> Self {
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.ymin, b.xmin, b.ymax, b.xmax]
    }
}

impl BoundingBox {
    pub fn validate(&self) -> Result<()> {
        let coords = [self.ymin, self.xmin, self.ymax, self.xmax];
        if coords
            .iter()
            .any(|c| !c.is_finite() || *c < 0.0 || *c > BOX_COORDINATE_MAX)
        {
            return Err(AssistError::EmptyResult(format!(
                "bounding box {:?} is outside the 0-1000 range",
                coords
            )));
        }
        if self.ymin >= self.ymax || self.xmin >= self.xmax {
            return Err(AssistError::EmptyResult(format!(
                "bounding box {:?} is degenerate",
                coords
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Absent, `null` and `[]` all mean "no region".
    #[serde(
        default,
        deserialize_with = "deserialize_box",
        skip_serializing_if = "Option::is_none"
    )]
    pub box2d: Option<BoundingBox>,
}

fn deserialize_box<'de, D>(deserializer: D) -> std::result::Result<Option<BoundingBox>, D::Error>
where
    D: Deserializer<'de>,
{
    let coords = Option::<Vec<f64>>::deserialize(deserializer)?.unwrap_or_default();
    if coords.is_empty() {
        return Ok(None);
    }
    <[f64; 4]>::try_from(coords.as_slice())
        .map(|c| Some(BoundingBox::from(c)))
        .map_err(|_| D::Error::invalid_length(coords.len(), &"an empty array or 4 coordinates"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTrend {
    pub metric: String,
    pub previous: f64,
    pub current: f64,
    #[serde(default)]
    pub unit: String,
    pub trend: Trend,
}

fn default_patient_name() -> String {
    "Patient".to_string()
}

/// Structured record produced by an analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default = "default_patient_name")]
    pub patient_name: String,
    #[serde(default)]
    pub patient_id: String,
    #[serde(default)]
    pub age: f64,
    #[serde(default)]
    pub vitals: PatientVitals,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_comparison: Option<Vec<MetricTrend>>,
}

impl AnalysisResult {
    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    /// Check the numeric ranges and geometric invariants serde cannot express.
    ///
    /// Duplicate modality tags on a finding are collapsed, keeping first-seen order.
    pub fn validate(mut self) -> Result<Self> {
        if !(0.0..=100.0).contains(&self.risk_score) {
            return Err(AssistError::EmptyResult(format!(
                "riskScore {} is outside 0-100",
                self.risk_score
            )));
        }
        if !self.age.is_finite() || self.age < 0.0 {
            return Err(AssistError::EmptyResult(format!(
                "age {} is not a valid age",
                self.age
            )));
        }

        for finding in &mut self.findings {
            if !(0.0..=100.0).contains(&finding.confidence) {
                return Err(AssistError::EmptyResult(format!(
                    "finding '{}' has confidence {} outside 0-100",
                    finding.title, finding.confidence
                )));
            }
            let mut seen = Vec::with_capacity(finding.modality_source.len());
            finding.modality_source.retain(|m| {
                if seen.contains(m) {
                    false
                } else {
                    seen.push(*m);
                    true
                }
            });
        }

        for annotation in &self.annotations {
            if let Some(bbox) = &annotation.box2d {
                bbox.validate()?;
            }
        }

        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}
