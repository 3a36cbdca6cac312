use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::error::{AssistError, Result};
use crate::protocol::Part;

const MIB: u64 = 1024 * 1024;

/// Class of an input file; each class carries its own size ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Report,
    Image,
    Video,
}

impl AttachmentKind {
    pub fn size_limit(&self) -> u64 {
        match self {
            AttachmentKind::Report | AttachmentKind::Image => 50 * MIB,
            AttachmentKind::Video => 100 * MIB,
        }
    }

    fn caption(&self) -> &'static str {
        match self {
            AttachmentKind::Report => "Here is the medical report.",
            AttachmentKind::Image => "Here is the medical scan.",
            AttachmentKind::Video => "Here is a video context.",
        }
    }

    /// Classify a declared media type. PDFs, Word documents and plain text are reports.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        if mime_type.starts_with("image/") {
            Some(AttachmentKind::Image)
        } else if mime_type.starts_with("video/") {
            Some(AttachmentKind::Video)
        } else if REPORT_MIME_TYPES.contains(&mime_type.as_str()) || mime_type.starts_with("text/") {
            Some(AttachmentKind::Report)
        } else {
            None
        }
    }

    /// Upload slot names: `report`, `image`, `video`.
    pub fn from_slot(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "report" => Some(AttachmentKind::Report),
            "image" => Some(AttachmentKind::Image),
            "video" => Some(AttachmentKind::Video),
            _ => None,
        }
    }
}

const REPORT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttachmentKind::Report => "report",
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
        };
        f.write_str(name)
    }
}

/// A binary input file with its declared media type.
#[derive(Clone)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub kind: AttachmentKind,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("kind", &self.kind)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl Attachment {
    /// Wrap in-memory bytes, inferring the kind from the media type.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self> {
        let name = name.into();
        let mime_type = mime_type.into();
        let kind = AttachmentKind::from_mime_type(&mime_type).ok_or_else(|| {
            AssistError::UnsupportedMediaType {
                file: name.clone(),
                mime_type: mime_type.clone(),
            }
        })?;
        Ok(Self {
            name,
            mime_type,
            kind,
            bytes,
        })
    }

    /// Wrap in-memory bytes uploaded into a named slot. The slot decides the
    /// kind; the media type only has to be one the model accepts.
    pub fn in_slot(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        kind: AttachmentKind,
        bytes: Vec<u8>,
    ) -> Result<Self> {
        let mut attachment = Self::from_bytes(name, mime_type, bytes)?;
        attachment.kind = kind;
        Ok(attachment)
    }

    /// Read a file from disk. The size ceiling is checked against the file
    /// metadata before any bytes are read.
    pub async fn from_path(
        path: impl AsRef<Path>,
        mime_type: impl Into<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_type.into();
        let kind = AttachmentKind::from_mime_type(&mime_type).ok_or_else(|| {
            AssistError::UnsupportedMediaType {
                file: name.clone(),
                mime_type: mime_type.clone(),
            }
        })?;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| AssistError::FileProcessingFailed {
                file: name.clone(),
                reason: e.to_string(),
            })?;
        check_size(&name, kind, metadata.len())?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AssistError::FileProcessingFailed {
                file: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            mime_type,
            kind,
            bytes,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn check_size(&self) -> Result<()> {
        check_size(&self.name, self.kind, self.size())
    }

    /// Encode as an inline base64 part tagged with the media type.
    pub fn to_part(&self) -> Result<Part> {
        if self.mime_type.trim().is_empty() {
            return Err(AssistError::FileProcessingFailed {
                file: self.name.clone(),
                reason: "missing media type".to_string(),
            });
        }
        Ok(Part::inline_data(
            self.mime_type.clone(),
            STANDARD.encode(&self.bytes),
        ))
    }
}

fn check_size(name: &str, kind: AttachmentKind, size: u64) -> Result<()> {
    let limit = kind.size_limit();
    if size > limit {
        return Err(AssistError::SizeLimitExceeded {
            file: name.to_string(),
            kind,
            size,
            limit,
        });
    }
    Ok(())
}

/// Per-call input to an analysis: up to one attachment per kind plus instructions.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub report: Option<Attachment>,
    pub image: Option<Attachment>,
    pub video: Option<Attachment>,
    pub instructions: Option<String>,
}

impl AnalysisRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(mut self, attachment: Attachment) -> Self {
        self.report = Some(attachment);
        self
    }

    pub fn with_image(mut self, attachment: Attachment) -> Self {
        self.image = Some(attachment);
        self
    }

    pub fn with_video(mut self, attachment: Attachment) -> Self {
        self.video = Some(attachment);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Slot an attachment by its own kind, replacing any previous one of that kind.
    pub fn with_attachment(self, attachment: Attachment) -> Self {
        match attachment.kind {
            AttachmentKind::Report => self.with_report(attachment),
            AttachmentKind::Image => self.with_image(attachment),
            AttachmentKind::Video => self.with_video(attachment),
        }
    }

    /// Slot a batch of uploads. Two files of the same kind is an error.
    pub fn from_attachments(attachments: impl IntoIterator<Item = Attachment>) -> Result<Self> {
        let mut request = Self::new();
        for attachment in attachments {
            if request.attachments().any(|a| a.kind == attachment.kind) {
                return Err(AssistError::InvalidRequest(format!(
                    "only one {} may be attached per request, got another: '{}'",
                    attachment.kind, attachment.name
                )));
            }
            request = request.with_attachment(attachment);
        }
        Ok(request)
    }

    /// Present attachments in report, image, video order.
    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        [&self.report, &self.image, &self.video]
            .into_iter()
            .filter_map(|a| a.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.attachments().next().is_none()
    }

    pub fn total_bytes(&self) -> u64 {
        self.attachments().map(Attachment::size).sum()
    }

    /// Validate every ceiling first, then encode. Nothing is encoded when any
    /// attachment is oversized.
    pub fn build_parts(&self) -> Result<Vec<Part>> {
        if self.is_empty() {
            return Err(AssistError::InvalidRequest(
                "at least one report, image, or video is required".to_string(),
            ));
        }
        for attachment in self.attachments() {
            attachment.check_size()?;
        }

        let mut parts = Vec::new();
        for attachment in self.attachments() {
            debug!(
                file = %attachment.name,
                kind = %attachment.kind,
                size = attachment.size(),
                "Encoding attachment"
            );
            parts.push(attachment.to_part()?);
            parts.push(Part::text(attachment.kind.caption()));
        }
        if let Some(instructions) = self
            .instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            parts.push(Part::text(instructions));
        }
        Ok(parts)
    }
}
