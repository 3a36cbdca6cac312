use clinical_assist::demo::{DemoScenario, MockAttachment};
use clinical_assist::{Attachment, AttachmentKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Listing entry for `GET /demo/scenarios`; the canned analysis is left out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub prompt: String,
    pub attachment: MockAttachment,
}

impl From<&DemoScenario> for ScenarioSummary {
    fn from(scenario: &DemoScenario) -> Self {
        Self {
            id: scenario.id.clone(),
            title: scenario.title.clone(),
            description: scenario.description.clone(),
            prompt: scenario.prompt.clone(),
            attachment: scenario.mock_attachment.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// A file part of a multipart form, kept with the field it arrived in.
#[derive(Debug)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// Kind inferred from the media type.
    pub fn into_attachment(self) -> clinical_assist::Result<Attachment> {
        Attachment::from_bytes(self.file_name, self.mime_type, self.bytes)
    }

    /// Kind taken from the field name when it names a slot, else inferred.
    pub fn into_slotted_attachment(self) -> clinical_assist::Result<Attachment> {
        match AttachmentKind::from_slot(&self.field) {
            Some(kind) => Attachment::in_slot(self.file_name, self.mime_type, kind, self.bytes),
            None => self.into_attachment(),
        }
    }
}

/// A multipart form split into its text fields and uploaded files.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}
