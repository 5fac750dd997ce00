//! Document chunk entity - the unit of embedding for files

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_chunks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub attachment_id: i64,

    pub guild_id: i64,

    pub channel_id: i64,

    pub chunk_index: i32,

    #[sea_orm(column_type = "Text")]
    pub chunk_text: String,

    /// Heading-level parent for structural chunking context
    pub parent_chunk_id: Option<Uuid>,

    pub token_count: i32,

    pub vector_key: Option<Uuid>,

    pub indexed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attachment::Entity",
        from = "Column::AttachmentId",
        to = "super::attachment::Column::Id"
    )]
    Attachment,
}

impl Related<super::attachment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attachment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
