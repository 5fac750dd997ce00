//! Sliding-window sessionizer
//!
//! Groups a time-ordered stream of messages within one channel into
//! conversation sessions. A new session starts on:
//! 1. channel change
//! 2. a temporal gap above the threshold, unless the message is a reply
//!    chained into the current session
//! 3. a reply pointing outside the current session (topic shift)
//! 4. the session's enriched token budget being exceeded
//!
//! Pure: the output `(start_id, end_id)` pairs are a function only of
//! the input list and parameters.

pub mod enrich;
pub mod semantic;

use chrono::{DateTime, Duration, FixedOffset};
use std::collections::HashSet;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Estimated token overhead added per message by enrichment
/// (`[<author> @ <YYYY-MM-DD HH:MM>]: ` prefix).
const ENRICHMENT_OVERHEAD_TOKENS: usize = 8;

/// Lightweight message representation for sessionization.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMessage {
    pub id: i64,
    pub channel_id: i64,
    pub author_id: i64,
    pub content: String,
    pub timestamp: DateTime<FixedOffset>,
    pub reply_to_id: Option<i64>,
}

impl From<&crate::db::models::Message> for SessionMessage {
    fn from(m: &crate::db::models::Message) -> Self {
        Self {
            id: m.id,
            channel_id: m.channel_id,
            author_id: m.author_id,
            content: m.content.clone(),
            timestamp: m.message_timestamp,
            reply_to_id: m.reply_to_id,
        }
    }
}

/// A group of related messages.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDraft {
    pub channel_id: i64,
    pub messages: Vec<SessionMessage>,
}

impl SessionDraft {
    fn new(channel_id: i64) -> Self {
        Self {
            channel_id,
            messages: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn start_message_id(&self) -> i64 {
        self.messages.first().map(|m| m.id).unwrap_or(0)
    }

    pub fn end_message_id(&self) -> i64 {
        self.messages.last().map(|m| m.id).unwrap_or(0)
    }

    pub fn message_ids(&self) -> Vec<i64> {
        self.messages.iter().map(|m| m.id).collect()
    }

    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        self.messages.first().map(|m| m.timestamp)
    }

    pub fn end_time(&self) -> Option<DateTime<FixedOffset>> {
        self.messages.last().map(|m| m.timestamp)
    }

    pub fn author_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.messages.iter().map(|m| m.author_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Sessionizer tuning.
#[derive(Debug, Clone)]
pub struct SessionizerParams {
    /// Temporal gap that breaks a session
    pub time_gap: Duration,
    /// Enriched token budget per session
    pub max_tokens: usize,
    /// Sessions below this size are not embedded
    pub min_messages: usize,
}

impl Default for SessionizerParams {
    fn default() -> Self {
        Self {
            time_gap: Duration::minutes(15),
            max_tokens: 480,
            min_messages: 2,
        }
    }
}

impl SessionizerParams {
    pub fn from_config(config: &crate::config::SessionConfig) -> Self {
        Self {
            time_gap: Duration::seconds(config.time_gap_secs),
            max_tokens: config.max_tokens,
            min_messages: config.min_messages,
        }
    }
}

/// Token estimate for one message after enrichment.
pub fn message_token_estimate(message: &SessionMessage) -> usize {
    message.content.len() / CHARS_PER_TOKEN + ENRICHMENT_OVERHEAD_TOKENS
}

fn should_break(
    current: &SessionMessage,
    previous: &SessionMessage,
    active_reply_chain: &HashSet<i64>,
    session_tokens: usize,
    params: &SessionizerParams,
) -> bool {
    // Rule 4: token budget
    if session_tokens + message_token_estimate(current) > params.max_tokens {
        return true;
    }

    let replies_into_session = current
        .reply_to_id
        .map(|id| active_reply_chain.contains(&id))
        .unwrap_or(false);

    // Rule 2: temporal gap; a reply chained into the session extends it
    if current.timestamp - previous.timestamp > params.time_gap && !replies_into_session {
        return true;
    }

    // Rule 3: replying to something outside the session is a topic shift
    if let Some(reply_to) = current.reply_to_id {
        if !active_reply_chain.contains(&reply_to) {
            return true;
        }
    }

    false
}

/// Group messages into sessions. Input order does not matter; messages
/// are sorted by (timestamp, id) first. Every message lands in exactly
/// one draft; size filtering is the caller's concern (see
/// [`usable_sessions`]).
pub fn sessionize(messages: &[SessionMessage], params: &SessionizerParams) -> Vec<SessionDraft> {
    if messages.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&SessionMessage> = messages.iter().collect();
    sorted.sort_by_key(|m| (m.timestamp, m.id));

    let mut sessions: Vec<SessionDraft> = Vec::new();
    let mut current = SessionDraft::new(sorted[0].channel_id);
    let mut active_reply_chain: HashSet<i64> = HashSet::new();
    let mut session_tokens = 0usize;

    for (i, message) in sorted.iter().enumerate() {
        if i == 0 {
            session_tokens += message_token_estimate(message);
            current.messages.push((*message).clone());
            active_reply_chain.insert(message.id);
            continue;
        }

        let previous = sorted[i - 1];

        // Rule 1: channel change always breaks
        if message.channel_id != current.channel_id {
            if !current.is_empty() {
                sessions.push(current);
            }
            current = SessionDraft::new(message.channel_id);
            active_reply_chain.clear();
            session_tokens = 0;
        } else if should_break(message, previous, &active_reply_chain, session_tokens, params) {
            if !current.is_empty() {
                sessions.push(current);
            }
            current = SessionDraft::new(message.channel_id);
            active_reply_chain.clear();
            session_tokens = 0;
        }

        session_tokens += message_token_estimate(message);
        current.messages.push((*message).clone());
        active_reply_chain.insert(message.id);
        if let Some(reply_to) = message.reply_to_id {
            active_reply_chain.insert(reply_to);
        }
    }

    if !current.is_empty() {
        sessions.push(current);
    }

    sessions
}

/// Drop drafts below the embedding size threshold.
pub fn usable_sessions(drafts: Vec<SessionDraft>, params: &SessionizerParams) -> Vec<SessionDraft> {
    drafts
        .into_iter()
        .filter(|d| d.len() >= params.min_messages)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(id: i64, channel_id: i64, minutes: i64) -> SessionMessage {
        msg_with_reply(id, channel_id, minutes, None)
    }

    fn msg_with_reply(
        id: i64,
        channel_id: i64,
        minutes: i64,
        reply_to_id: Option<i64>,
    ) -> SessionMessage {
        SessionMessage {
            id,
            channel_id,
            author_id: 1,
            content: "test".to_string(),
            timestamp: (Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
                + Duration::minutes(minutes))
            .into(),
            reply_to_id,
        }
    }

    #[test]
    fn test_time_gap_breaks_session() {
        let messages = vec![
            msg(1, 1, 0),
            msg(2, 1, 5),
            msg(3, 1, 10),
            // Gap > 15 minutes
            msg(4, 1, 30),
            msg(5, 1, 35),
        ];

        let sessions = sessionize(&messages, &SessionizerParams::default());
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].message_ids(), vec![1, 2, 3]);
        assert_eq!(sessions[1].message_ids(), vec![4, 5]);
    }

    #[test]
    fn test_channel_change_breaks_session() {
        let messages = vec![
            msg(1, 100, 0),
            msg(2, 100, 1),
            msg(3, 200, 2),
            msg(4, 200, 3),
        ];

        let sessions = sessionize(&messages, &SessionizerParams::default());
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].channel_id, 100);
        assert_eq!(sessions[1].channel_id, 200);
    }

    #[test]
    fn test_reply_extends_across_gap() {
        let messages = vec![
            msg(1, 1, 0),
            msg(2, 1, 1),
            // 20-minute gap, but chained into the session by reply
            msg_with_reply(3, 1, 21, Some(2)),
        ];

        let sessions = sessionize(&messages, &SessionizerParams::default());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_reply_outside_session_breaks() {
        let messages = vec![
            msg(10, 1, 0),
            msg(11, 1, 1),
            // Replies to message 5, which is not in the session
            msg_with_reply(12, 1, 2, Some(5)),
        ];

        let sessions = sessionize(&messages, &SessionizerParams::default());
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].message_ids(), vec![10, 11]);
        assert_eq!(sessions[1].message_ids(), vec![12]);
    }

    #[test]
    fn test_token_budget_breaks_session() {
        let long_content = "x".repeat(800); // ~200 tokens each
        let messages: Vec<SessionMessage> = (1..=5)
            .map(|id| SessionMessage {
                content: long_content.clone(),
                ..msg(id, 1, id)
            })
            .collect();

        let sessions = sessionize(&messages, &SessionizerParams::default());
        assert!(sessions.len() > 1, "token budget should force a split");
        let total: usize = sessions.iter().map(|s| s.len()).sum();
        assert_eq!(total, 5, "every message lands in exactly one session");
    }

    #[test]
    fn test_unsorted_input_is_sorted_first() {
        let messages = vec![msg(3, 1, 2), msg(1, 1, 0), msg(2, 1, 1)];
        let sessions = sessionize(&messages, &SessionizerParams::default());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_purity() {
        let messages = vec![
            msg(1, 1, 0),
            msg(2, 1, 5),
            msg_with_reply(3, 1, 25, Some(2)),
            msg(4, 1, 60),
            msg(5, 1, 61),
        ];
        let params = SessionizerParams::default();

        let a: Vec<(i64, i64)> = sessionize(&messages, &params)
            .iter()
            .map(|s| (s.start_message_id(), s.end_message_id()))
            .collect();
        let b: Vec<(i64, i64)> = sessionize(&messages, &params)
            .iter()
            .map(|s| (s.start_message_id(), s.end_message_id()))
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_usable_sessions_filters_singletons() {
        let messages = vec![msg(1, 1, 0), msg(2, 1, 1), msg(3, 1, 40)];
        let params = SessionizerParams::default();
        let sessions = usable_sessions(sessionize(&messages, &params), &params);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_ids(), vec![1, 2]);
    }

    #[test]
    fn test_empty_input() {
        assert!(sessionize(&[], &SessionizerParams::default()).is_empty());
    }
}
