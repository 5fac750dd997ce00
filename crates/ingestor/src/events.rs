//! Inbound platform event contracts
//!
//! The upstream chat-platform adapter delivers these records at least
//! once; every record carries its own ids, so replay is handled by the
//! idempotent processor rather than by delivery bookkeeping.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    MessageCreate(MessageCreate),
    MessageEdit(MessageEdit),
    MessageDelete(MessageDelete),
    MessageBulkDelete(MessageBulkDelete),
    ChannelIndexingToggled(ChannelIndexingToggled),
    ChannelDelete(ChannelDelete),
    GuildActiveToggled(GuildActiveToggled),
    AttachmentCreate(AttachmentCreate),
}

impl GatewayEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            GatewayEvent::MessageCreate(_) => "message_create",
            GatewayEvent::MessageEdit(_) => "message_edit",
            GatewayEvent::MessageDelete(_) => "message_delete",
            GatewayEvent::MessageBulkDelete(_) => "message_bulk_delete",
            GatewayEvent::ChannelIndexingToggled(_) => "channel_indexing_toggled",
            GatewayEvent::ChannelDelete(_) => "channel_delete",
            GatewayEvent::GuildActiveToggled(_) => "guild_active_toggled",
            GatewayEvent::AttachmentCreate(_) => "attachment_create",
        }
    }

    pub fn guild_id(&self) -> i64 {
        match self {
            GatewayEvent::MessageCreate(e) => e.guild_id,
            GatewayEvent::MessageEdit(e) => e.guild_id,
            GatewayEvent::MessageDelete(e) => e.guild_id,
            GatewayEvent::MessageBulkDelete(e) => e.guild_id,
            GatewayEvent::ChannelIndexingToggled(e) => e.guild_id,
            GatewayEvent::ChannelDelete(e) => e.guild_id,
            GatewayEvent::GuildActiveToggled(e) => e.guild_id,
            GatewayEvent::AttachmentCreate(e) => e.guild_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCreate {
    pub guild_id: i64,
    pub guild_name: String,
    pub channel_id: i64,
    pub channel_name: String,
    pub message_id: i64,
    pub author_id: i64,
    pub author_name: String,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
    pub timestamp: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEdit {
    pub guild_id: i64,
    pub channel_id: i64,
    pub message_id: i64,
    pub author_id: i64,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    pub timestamp: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDelete {
    pub guild_id: i64,
    pub channel_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBulkDelete {
    pub guild_id: i64,
    pub channel_id: i64,
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelIndexingToggled {
    pub guild_id: i64,
    pub channel_id: i64,
    pub indexed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDelete {
    pub guild_id: i64,
    pub channel_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildActiveToggled {
    pub guild_id: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentCreate {
    pub guild_id: i64,
    pub channel_id: i64,
    pub message_id: i64,
    pub attachment_id: i64,
    pub filename: String,
    pub source_url: String,
    pub mime: String,
    pub size_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip() {
        let json = serde_json::json!({
            "type": "message_create",
            "guild_id": 10,
            "guild_name": "test guild",
            "channel_id": 100,
            "channel_name": "general",
            "message_id": 1,
            "author_id": 7,
            "author_name": "alice",
            "content": "hello",
            "timestamp": "2024-03-05T14:30:00Z"
        });
        let event: GatewayEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.event_type(), "message_create");
        assert_eq!(event.guild_id(), 10);

        match event {
            GatewayEvent::MessageCreate(e) => {
                assert_eq!(e.message_id, 1);
                assert!(!e.author_is_bot);
                assert!(e.reply_to_id.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_bulk_delete_round_trip() {
        let json = serde_json::json!({
            "type": "message_bulk_delete",
            "guild_id": 10,
            "channel_id": 100,
            "message_ids": [1, 2, 3]
        });
        let event: GatewayEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.event_type(), "message_bulk_delete");
    }
}
