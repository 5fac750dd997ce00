//! Message entity - source of truth before vector indexing

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Replacement content written on soft delete. The original content of a
/// deleted message is never emitted from any interface.
pub const DELETED_CONTENT: &str = "[deleted]";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub channel_id: i64,

    pub guild_id: i64,

    pub author_id: i64,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// Threading context for the sessionizer: a reply chained into the
    /// current session extends it across a temporal gap.
    pub reply_to_id: Option<i64>,

    pub message_timestamp: DateTimeWithTimeZone,

    // Soft delete for right-to-be-forgotten
    pub is_deleted: bool,

    pub deleted_at: Option<DateTimeWithTimeZone>,

    // Vector sync status
    pub vector_key: Option<Uuid>,

    pub indexed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// A non-deleted record whose content changed after indexing must be
    /// re-indexed.
    pub fn is_stale(&self) -> bool {
        match self.indexed_at {
            Some(indexed_at) => !self.is_deleted && self.updated_at > indexed_at,
            None => false,
        }
    }

    /// A deleted record still holding a vector key needs a purge.
    pub fn needs_purge(&self) -> bool {
        self.is_deleted && self.vector_key.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::guild::Entity",
        from = "Column::GuildId",
        to = "super::guild::Column::Id"
    )]
    Guild,

    #[sea_orm(
        belongs_to = "super::channel::Entity",
        from = "Column::ChannelId",
        to = "super::channel::Column::Id"
    )]
    Channel,

    #[sea_orm(has_many = "super::attachment::Entity")]
    Attachment,
}

impl Related<super::guild::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Guild.def()
    }
}

impl Related<super::channel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Channel.def()
    }
}

impl Related<super::attachment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attachment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
