//! Workspace API wire types and message validation.

use chrono::{DateTime, TimeZone, Utc};
use harvest_store::StoredMessage;
use serde::Deserialize;
use thiserror::Error;

use crate::walker::Page;

/// Error codes that mean the token may not read a partition.
pub const PERMISSION_ERRORS: [&str; 3] = ["missing_scope", "not_allowed_token_type", "no_permission"];

/// `ok`/`error` envelope shared by every endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub ok: bool,
    pub error: Option<String>,
}

impl Envelope {
    /// The envelope of `page`. Empty pages read as `ok` with no data.
    pub fn of(page: &Page) -> Self {
        if page.is_empty() {
            return Self {
                ok: true,
                error: None,
            };
        }
        page.parse().unwrap_or(Self {
            ok: false,
            error: Some("malformed_response".to_string()),
        })
    }

    pub fn error_code(&self) -> Option<&str> {
        if self.ok {
            None
        } else {
            Some(self.error.as_deref().unwrap_or("unknown_error"))
        }
    }

    pub fn is_permission_error(&self) -> bool {
        self.error_code()
            .map_or(false, |code| PERMISSION_ERRORS.contains(&code))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireChannel {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub is_archived: bool,
    /// Counterpart of a direct DM.
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsResponse {
    #[serde(default)]
    pub channels: Vec<WireChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireEdit {
    pub ts: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireMessage {
    pub ts: Option<String>,
    pub user: Option<String>,
    pub text: Option<String>,
    pub thread_ts: Option<String>,
    pub subtype: Option<String>,
    pub edited: Option<WireEdit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireProfile {
    pub display_name: Option<String>,
    pub real_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireUser {
    pub id: String,
    pub name: Option<String>,
    pub real_name: Option<String>,
    #[serde(default)]
    pub profile: WireProfile,
}

impl WireUser {
    /// Best human-readable name: real name, then profile names, then handle.
    pub fn display_name(&self) -> String {
        [
            self.real_name.as_deref(),
            self.profile.real_name.as_deref(),
            self.profile.display_name.as_deref(),
            self.name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .unwrap_or(self.id.as_str())
        .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoResponse {
    pub user: Option<WireUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageRejected {
    #[error("system message ({0})")]
    Subtype(String),

    #[error("message {ts} has no author")]
    MissingAuthor { ts: String },

    #[error("message has no timestamp")]
    MissingTimestamp,

    #[error("unparseable timestamp '{0}'")]
    BadTimestamp(String),
}

/// A validated user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestedMessage {
    pub channel_id: String,
    pub ts: String,
    pub author_id: String,
    /// Raw text as returned by the API.
    pub text: String,
    pub thread_ts: Option<String>,
    pub edited_ts: Option<String>,
    pub posted_at: DateTime<Utc>,
}

impl HarvestedMessage {
    pub fn from_wire(channel_id: &str, wire: WireMessage) -> Result<Self, MessageRejected> {
        if let Some(subtype) = wire.subtype {
            return Err(MessageRejected::Subtype(subtype));
        }
        let ts = wire
            .ts
            .filter(|ts| !ts.is_empty())
            .ok_or(MessageRejected::MissingTimestamp)?;
        let posted_at = parse_ts(&ts).ok_or_else(|| MessageRejected::BadTimestamp(ts.clone()))?;
        let author_id = wire
            .user
            .filter(|user| !user.is_empty())
            .ok_or_else(|| MessageRejected::MissingAuthor { ts: ts.clone() })?;

        Ok(Self {
            channel_id: channel_id.to_string(),
            ts,
            author_id,
            text: wire.text.unwrap_or_default(),
            thread_ts: wire.thread_ts,
            edited_ts: wire.edited.and_then(|e| e.ts),
            posted_at,
        })
    }

    /// A message that starts a thread carries its own ts as `thread_ts`.
    pub fn is_thread_root(&self) -> bool {
        self.thread_ts.as_deref() == Some(self.ts.as_str())
    }

    pub fn to_stored(&self) -> StoredMessage {
        StoredMessage::new(&self.channel_id, &self.ts, &self.author_id, &self.text)
            .with_thread_ts(self.thread_ts.clone())
            .with_edited_ts(self.edited_ts.clone())
    }
}

/// Parse an API timestamp (`"1704067200.000100"`).
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = match ts.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (ts, ""),
    };
    let secs = secs.parse::<i64>().ok()?;
    let micros = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().take(6).collect();
        format!("{:0<6}", digits).parse::<u32>().ok()?
    };
    Utc.timestamp_opt(secs, micros * 1000).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(value: serde_json::Value) -> WireMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_ts_parsing() {
        let dt = parse_ts("1704067200.000100").unwrap();
        assert_eq!(dt.timestamp(), 1704067200);
        assert_eq!(dt.timestamp_subsec_micros(), 100);
        assert_eq!(parse_ts("1704067200").unwrap().timestamp(), 1704067200);
        assert!(parse_ts("yesterday").is_none());
    }

    #[test]
    fn test_validation_rejects_with_reason() {
        let subtype = wire(json!({"ts": "1.0", "user": "U1", "subtype": "channel_join"}));
        assert_eq!(
            HarvestedMessage::from_wire("C1", subtype),
            Err(MessageRejected::Subtype("channel_join".to_string()))
        );

        let no_user = wire(json!({"ts": "1.0", "text": "bot"}));
        assert_eq!(
            HarvestedMessage::from_wire("C1", no_user),
            Err(MessageRejected::MissingAuthor { ts: "1.0".to_string() })
        );

        let no_ts = wire(json!({"user": "U1"}));
        assert_eq!(
            HarvestedMessage::from_wire("C1", no_ts),
            Err(MessageRejected::MissingTimestamp)
        );
    }

    #[test]
    fn test_valid_message() {
        let msg = HarvestedMessage::from_wire(
            "C1",
            wire(json!({
                "ts": "1756700000.000200",
                "user": "U1",
                "text": "hello",
                "thread_ts": "1756700000.000200",
                "reply_count": 2,
                "edited": {"ts": "1756700100.000000"}
            })),
        )
        .unwrap();
        assert!(msg.is_thread_root());

        let stored = msg.to_stored();
        assert_eq!(stored.edited_ts.as_deref(), Some("1756700100.000000"));
        assert_eq!(stored.thread_ts.as_deref(), Some("1756700000.000200"));
        assert_eq!(stored.content_hash, harvest_store::content_hash("hello"));
    }

    #[test]
    fn test_envelope_and_names() {
        let denied = Page::new(json!({"ok": false, "error": "missing_scope"}));
        assert!(Envelope::of(&denied).is_permission_error());
        assert!(Envelope::of(&Page::empty()).ok);

        let user: UserInfoResponse = serde_json::from_value(json!({
            "ok": true,
            "user": {"id": "U1", "name": "alice", "real_name": "", "profile": {"display_name": "Ali"}}
        }))
        .unwrap();
        assert_eq!(user.user.unwrap().display_name(), "Ali");
    }
}
