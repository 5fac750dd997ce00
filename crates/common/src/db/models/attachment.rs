//! Attachment entity for async document processing

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Attachment source type, dispatched on by the ingest pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Image,
    Pdf,
    Text,
    Markdown,
}

impl SourceType {
    /// Classify an attachment from its mime type and filename. Returns
    /// None for types the pipeline does not process.
    pub fn classify(mime: &str, filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if mime.starts_with("image/") {
            return Some(SourceType::Image);
        }
        if mime == "application/pdf" || lower.ends_with(".pdf") {
            return Some(SourceType::Pdf);
        }
        if lower.ends_with(".md") || lower.ends_with(".markdown") || mime == "text/markdown" {
            return Some(SourceType::Markdown);
        }
        if mime.starts_with("text/") || lower.ends_with(".txt") {
            return Some(SourceType::Text);
        }
        None
    }
}

impl From<String> for SourceType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "image" => SourceType::Image,
            "pdf" => SourceType::Pdf,
            "markdown" => SourceType::Markdown,
            _ => SourceType::Text,
        }
    }
}

impl From<SourceType> for String {
    fn from(t: SourceType) -> Self {
        match t {
            SourceType::Image => "image".to_string(),
            SourceType::Pdf => "pdf".to_string(),
            SourceType::Text => "text".to_string(),
            SourceType::Markdown => "markdown".to_string(),
        }
    }
}

/// Processing lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<String> for ProcessingStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => ProcessingStatus::Processing,
            "completed" => ProcessingStatus::Completed,
            "failed" => ProcessingStatus::Failed,
            _ => ProcessingStatus::Pending,
        }
    }
}

impl From<ProcessingStatus> for String {
    fn from(status: ProcessingStatus) -> Self {
        match status {
            ProcessingStatus::Pending => "pending".to_string(),
            ProcessingStatus::Processing => "processing".to_string(),
            ProcessingStatus::Completed => "completed".to_string(),
            ProcessingStatus::Failed => "failed".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "attachments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub message_id: i64,

    pub guild_id: i64,

    pub channel_id: i64,

    #[sea_orm(column_type = "Text")]
    pub source_url: String,

    pub mime: String,

    pub size_bytes: i64,

    #[sea_orm(column_type = "Text")]
    pub source_type: String,

    #[sea_orm(column_type = "Text")]
    pub processing_status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub processing_error: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub extracted_text: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub is_deleted: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn source_type(&self) -> SourceType {
        SourceType::from(self.source_type.clone())
    }

    pub fn processing_status(&self) -> ProcessingStatus {
        ProcessingStatus::from(self.processing_status.clone())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.processing_status(),
            ProcessingStatus::Completed | ProcessingStatus::Failed
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::message::Entity",
        from = "Column::MessageId",
        to = "super::message::Column::Id"
    )]
    Message,

    #[sea_orm(has_many = "super::document_chunk::Entity")]
    DocumentChunk,
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

impl Related<super::document_chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DocumentChunk.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_mime() {
        assert_eq!(
            SourceType::classify("image/png", "diagram.png"),
            Some(SourceType::Image)
        );
        assert_eq!(
            SourceType::classify("application/pdf", "paper.pdf"),
            Some(SourceType::Pdf)
        );
        assert_eq!(
            SourceType::classify("text/plain", "notes.txt"),
            Some(SourceType::Text)
        );
    }

    #[test]
    fn test_classify_markdown_by_extension() {
        assert_eq!(
            SourceType::classify("application/octet-stream", "README.md"),
            Some(SourceType::Markdown)
        );
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(SourceType::classify("application/zip", "archive.zip"), None);
    }
}
