//! Metadata enrichment - prepends context to text before embedding.
//!
//! Canonical form handed to the embedder:
//!
//! ```text
//! Conversation in #<channel>:
//! [<author> @ <YYYY-MM-DD HH:MM>]: <content>
//! [<author> @ <YYYY-MM-DD HH:MM>]: <content>
//! ```
//!
//! Enrichment is applied to the text only; message records are unchanged.

use super::SessionMessage;
use std::collections::HashMap;

/// Resolve a user id to a display name, with a stable fallback for
/// users the cache has never seen.
pub fn resolve_user(user_id: i64, names: &HashMap<i64, String>) -> String {
    names
        .get(&user_id)
        .cloned()
        .unwrap_or_else(|| format!("User#{}", user_id))
}

/// Replace platform mention syntax with readable text:
/// - `<@123>` / `<@!123>` -> `@Name`
/// - `<@&123>` -> `@role`
/// - `<#123>` -> `#channel`
pub fn clean_mentions(content: &str, names: &HashMap<i64, String>) -> String {
    let mut out = String::with_capacity(content.len());
    let bytes = content.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some((replacement, consumed)) = parse_mention(&content[i..], names) {
                out.push_str(&replacement);
                i += consumed;
                continue;
            }
        }
        match content[i..].chars().next() {
            Some(ch) => {
                out.push(ch);
                i += ch.len_utf8();
            }
            None => break,
        }
    }

    out
}

/// Parse one mention at the start of `rest`; returns the replacement and
/// the byte length consumed, or None when this is not a mention.
fn parse_mention(rest: &str, names: &HashMap<i64, String>) -> Option<(String, usize)> {
    let close = rest.find('>')?;
    let inner = &rest[1..close];

    let (kind, digits) = if let Some(d) = inner.strip_prefix("@&") {
        ("role", d)
    } else if let Some(d) = inner.strip_prefix("@!") {
        ("user", d)
    } else if let Some(d) = inner.strip_prefix('@') {
        ("user", d)
    } else if let Some(d) = inner.strip_prefix('#') {
        ("channel", d)
    } else {
        return None;
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let replacement = match kind {
        "user" => {
            let id: i64 = digits.parse().ok()?;
            format!("@{}", resolve_user(id, names))
        }
        "role" => "@role".to_string(),
        _ => "#channel".to_string(),
    };

    Some((replacement, close + 1))
}

/// One enriched line: `[<author> @ <YYYY-MM-DD HH:MM>]: <content>`
pub fn enrich_message(message: &SessionMessage, names: &HashMap<i64, String>) -> String {
    let author = resolve_user(message.author_id, names);
    let time = message.timestamp.format("%Y-%m-%d %H:%M");
    let content = clean_mentions(&message.content, names);
    format!("[{} @ {}]: {}", author, time, content)
}

/// The canonical session text handed to the embedder.
pub fn session_text(
    channel_name: &str,
    messages: &[SessionMessage],
    names: &HashMap<i64, String>,
) -> String {
    let mut text = format!("Conversation in #{}:\n", channel_name);
    for message in messages {
        text.push_str(&enrich_message(message, names));
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(author_id: i64, content: &str) -> SessionMessage {
        SessionMessage {
            id: 1,
            channel_id: 100,
            author_id,
            content: content.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap().into(),
            reply_to_id: None,
        }
    }

    fn names() -> HashMap<i64, String> {
        HashMap::from([(7, "alice".to_string()), (8, "bob".to_string())])
    }

    #[test]
    fn test_enrich_message_format() {
        let line = enrich_message(&msg(7, "hello there"), &names());
        assert_eq!(line, "[alice @ 2024-03-05 14:30]: hello there");
    }

    #[test]
    fn test_unknown_user_fallback() {
        let line = enrich_message(&msg(99, "hi"), &names());
        assert_eq!(line, "[User#99 @ 2024-03-05 14:30]: hi");
    }

    #[test]
    fn test_clean_user_mentions() {
        let n = names();
        assert_eq!(clean_mentions("hey <@7>", &n), "hey @alice");
        assert_eq!(clean_mentions("hey <@!8>!", &n), "hey @bob!");
        assert_eq!(clean_mentions("ping <@42>", &n), "ping @User#42");
    }

    #[test]
    fn test_clean_role_and_channel_mentions() {
        let n = names();
        assert_eq!(clean_mentions("cc <@&500>", &n), "cc @role");
        assert_eq!(clean_mentions("see <#12345>", &n), "see #channel");
    }

    #[test]
    fn test_non_mention_angle_brackets_untouched() {
        let n = names();
        assert_eq!(clean_mentions("a < b and <notamention>", &n), "a < b and <notamention>");
    }

    #[test]
    fn test_session_text_layout() {
        let messages = vec![msg(7, "first"), msg(8, "second")];
        let text = session_text("general", &messages, &names());
        assert_eq!(
            text,
            "Conversation in #general:\n\
             [alice @ 2024-03-05 14:30]: first\n\
             [bob @ 2024-03-05 14:30]: second\n"
        );
    }
}
