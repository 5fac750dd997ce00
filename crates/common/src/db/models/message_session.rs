//! Message session entity - sessionizer output, the unit of embedding for chat

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "message_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub guild_id: i64,

    pub channel_id: i64,

    /// Sessions own references to contained message ids, not copies of
    /// content. The [start, end] id range identifies membership.
    pub start_message_id: i64,

    pub end_message_id: i64,

    pub message_count: i32,

    pub start_time: DateTimeWithTimeZone,

    pub end_time: DateTimeWithTimeZone,

    pub vector_key: Option<Uuid>,

    pub indexed_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub summary: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_stale(&self) -> bool {
        match self.indexed_at {
            Some(indexed_at) => self.updated_at > indexed_at,
            None => false,
        }
    }

    /// Whether a message id falls inside this session's range.
    pub fn contains(&self, message_id: i64) -> bool {
        message_id >= self.start_message_id && message_id <= self.end_message_id
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

impl ActiveModelBehavior for ActiveModel {}
