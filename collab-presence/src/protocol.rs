//! JSON wire protocol for the collaboration channel.
//!
//! Inbound frames are text messages of the form:
//! ```text
//! {
//!   "eventKind": "cursor" | "edit" | "join" | "leave" | "presence",
//!   "userId":    "u1",
//!   "name":      "Ann",            // join / presence
//!   "color":     "#f00",           // join / presence
//!   "data":      { ... },          // kind-specific
//!   "timestamp": "2024-05-01T12:00:00Z"
//! }
//! ```
//!
//! Outbound frames carry only `{ "eventKind": "cursor" | "edit", "data": ... }`;
//! the server stamps identity and time itself.
//!
//! Decoding is strict about the payload shape of each kind. Anything that
//! does not fit is reported as a [`DecodeError`] so the caller can log it
//! and carry on with the next frame.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kind tag of a collaboration event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Pointer/caret position of a collaborator
    Cursor,
    /// Document edit, forwarded untouched
    Edit,
    /// A collaborator entered the session
    Join,
    /// A collaborator left the session
    Leave,
    /// Full list of active collaborators
    Presence,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Cursor,
        EventKind::Edit,
        EventKind::Join,
        EventKind::Leave,
        EventKind::Presence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Cursor => "cursor",
            EventKind::Edit => "edit",
            EventKind::Join => "join",
            EventKind::Leave => "leave",
            EventKind::Presence => "presence",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownEventKind(s.to_string()))
    }
}

/// Cursor position in document coordinates.
///
/// `line`/`character` are only present for text-position cursors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<u32>,
}

impl CursorPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            line: None,
            character: None,
        }
    }

    /// Attach a text position (line, character) to this cursor.
    pub fn at_text(mut self, line: u32, character: u32) -> Self {
        self.line = Some(line);
        self.character = Some(character);
        self
    }
}

/// One entry of a `presence` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub cursor: Option<CursorPosition>,
    /// Absent or unparseable entries fall back to the time of the event.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// `presence` payload: the complete set of active collaborators.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceData {
    pub active_users: Vec<PresenceEntry>,
}

/// Kind-specific payload of a decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Cursor(CursorPosition),
    Presence(PresenceData),
    /// Opaque edit body; never interpreted by this crate.
    Edit(Value),
    /// `join` and `leave` carry no payload.
    Empty,
}

/// A decoded inbound event. Consumed once by reconciliation, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CollaborationEvent {
    pub kind: EventKind,
    pub user_id: String,
    pub name: Option<String>,
    pub color: Option<String>,
    pub payload: EventPayload,
    /// Server timestamp, when the server supplied one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Local time the frame was decoded.
    pub received_at: DateTime<Utc>,
}

impl CollaborationEvent {
    /// Decode one raw text frame.
    pub fn decode(raw: &str, received_at: DateTime<Utc>) -> Result<Self, DecodeError> {
        decode(raw, received_at)
    }

    /// Time to record as the collaborator's `last_seen`.
    pub fn seen_at(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(self.received_at)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(alias = "type")]
    event_kind: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Decode one raw inbound frame into a typed event.
///
/// `received_at` is stamped on the event so reconciliation stays a pure
/// function of its inputs.
pub fn decode(raw: &str, received_at: DateTime<Utc>) -> Result<CollaborationEvent, DecodeError> {
    let wire: WireEvent =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind: EventKind = wire.event_kind.parse()?;

    // A presence frame describes the whole room and may be sent without
    // an originating user.
    if wire.user_id.is_empty() && kind != EventKind::Presence {
        return Err(DecodeError::MissingUserId(kind));
    }

    let timestamp = wire.timestamp.as_deref().and_then(|ts| {
        let parsed = parse_timestamp(ts);
        if parsed.is_none() {
            log::warn!("Ignoring unparseable timestamp `{}` on {} event", ts, kind);
        }
        parsed
    });

    let payload = match kind {
        EventKind::Cursor => EventPayload::Cursor(typed_payload(kind, wire.data)?),
        EventKind::Presence => EventPayload::Presence(typed_payload(kind, wire.data)?),
        EventKind::Edit => EventPayload::Edit(wire.data.unwrap_or(Value::Null)),
        EventKind::Join | EventKind::Leave => EventPayload::Empty,
    };

    Ok(CollaborationEvent {
        kind,
        user_id: wire.user_id,
        name: wire.name,
        color: wire.color,
        payload,
        timestamp,
        received_at,
    })
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 and the offset-less `YYYY-MM-DDTHH:MM:SS[.fff]` form,
/// which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .into_iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(|ts| {
        let parsed = parse_timestamp(ts);
        if parsed.is_none() {
            log::warn!("Ignoring unparseable lastSeen `{}`", ts);
        }
        parsed
    }))
}

fn typed_payload<T: for<'de> Deserialize<'de>>(
    kind: EventKind,
    data: Option<Value>,
) -> Result<T, DecodeError> {
    let data = match data {
        Some(Value::Null) | None => return Err(DecodeError::MissingPayload(kind)),
        Some(data) => data,
    };
    serde_json::from_value(data).map_err(|e| DecodeError::PayloadMismatch {
        kind,
        reason: e.to_string(),
    })
}

/// Outbound frame. Only cursor and edit events are ever sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub event_kind: EventKind,
    pub data: Value,
}

impl OutboundMessage {
    pub fn cursor(position: &CursorPosition) -> Self {
        Self {
            event_kind: EventKind::Cursor,
            // A struct of plain numbers always converts.
            data: serde_json::to_value(position).unwrap_or(Value::Null),
        }
    }

    pub fn edit(data: Value) -> Self {
        Self {
            event_kind: EventKind::Edit,
            data,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Errors raised while decoding an inbound frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown event kind `{0}`")]
    UnknownEventKind(String),
    #[error("`{0}` event without a user id")]
    MissingUserId(EventKind),
    #[error("`{0}` event without a payload")]
    MissingPayload(EventKind),
    #[error("`{kind}` payload does not match: {reason}")]
    PayloadMismatch { kind: EventKind, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_join() {
        let raw = r##"{"eventKind":"join","userId":"u1","name":"Ann","color":"#f00"}"##;
        let event = decode(raw, now()).unwrap();

        assert_eq!(event.kind, EventKind::Join);
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.name.as_deref(), Some("Ann"));
        assert_eq!(event.color.as_deref(), Some("#f00"));
        assert_eq!(event.payload, EventPayload::Empty);
        assert!(event.timestamp.is_none());
        assert_eq!(event.seen_at(), now());
    }

    #[test]
    fn test_decode_accepts_type_alias() {
        let raw = r#"{"type":"leave","userId":"u1"}"#;
        let event = decode(raw, now()).unwrap();
        assert_eq!(event.kind, EventKind::Leave);
    }

    #[test]
    fn test_decode_cursor_with_text_position() {
        let raw = r#"{"eventKind":"cursor","userId":"u1",
            "data":{"x":5,"y":6.5,"line":3,"character":9},
            "timestamp":"2024-05-01T12:00:05Z"}"#;
        let event = decode(raw, now()).unwrap();

        assert_eq!(
            event.payload,
            EventPayload::Cursor(CursorPosition::new(5.0, 6.5).at_text(3, 9))
        );
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap();
        assert_eq!(event.timestamp, Some(ts));
        assert_eq!(event.seen_at(), ts);
    }

    #[test]
    fn test_decode_presence() {
        let raw = r##"{"eventKind":"presence","userId":"server","data":{"activeUsers":[
            {"userId":"u1","name":"Ann","color":"#f00"},
            {"userId":"u2","name":"Bo","color":"#0f0","cursor":{"x":1,"y":2},
             "lastSeen":"2024-05-01T11:59:00.000Z"}]}}"##;
        let event = decode(raw, now()).unwrap();

        let EventPayload::Presence(data) = event.payload else {
            panic!("Expected presence payload");
        };
        assert_eq!(data.active_users.len(), 2);
        assert!(data.active_users[0].cursor.is_none());
        assert!(data.active_users[0].last_seen.is_none());
        assert_eq!(data.active_users[1].cursor, Some(CursorPosition::new(1.0, 2.0)));
        assert!(data.active_users[1].last_seen.is_some());
    }

    #[test]
    fn test_decode_presence_without_user_id() {
        let raw = r#"{"eventKind":"presence","data":{"activeUsers":[]}}"#;
        let event = decode(raw, now()).unwrap();
        assert_eq!(event.kind, EventKind::Presence);
        assert!(event.user_id.is_empty());
    }

    #[test]
    fn test_decode_edit_passes_body_through() {
        let raw = r#"{"eventKind":"edit","userId":"u1","data":{"op":"insert","at":4}}"#;
        let event = decode(raw, now()).unwrap();
        assert_eq!(
            event.payload,
            EventPayload::Edit(serde_json::json!({"op": "insert", "at": 4}))
        );
    }

    #[test]
    fn test_decode_edit_without_data() {
        let raw = r#"{"eventKind":"edit","userId":"u1"}"#;
        let event = decode(raw, now()).unwrap();
        assert_eq!(event.payload, EventPayload::Edit(Value::Null));
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(
            decode("{not json", now()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let raw = r#"{"eventKind":"wave","userId":"u1"}"#;
        assert_eq!(
            decode(raw, now()),
            Err(DecodeError::UnknownEventKind("wave".into()))
        );
    }

    #[test]
    fn test_decode_missing_user_id() {
        let raw = r#"{"eventKind":"cursor","data":{"x":1,"y":2}}"#;
        assert_eq!(
            decode(raw, now()),
            Err(DecodeError::MissingUserId(EventKind::Cursor))
        );
    }

    #[test]
    fn test_decode_cursor_without_data() {
        let raw = r#"{"eventKind":"cursor","userId":"u1"}"#;
        assert_eq!(
            decode(raw, now()),
            Err(DecodeError::MissingPayload(EventKind::Cursor))
        );
    }

    #[test]
    fn test_decode_kind_payload_mismatch() {
        // Presence body sent under a cursor tag.
        let raw = r#"{"eventKind":"cursor","userId":"u1","data":{"activeUsers":[]}}"#;
        assert!(matches!(
            decode(raw, now()),
            Err(DecodeError::PayloadMismatch { kind: EventKind::Cursor, .. })
        ));
    }

    #[test]
    fn test_decode_bad_timestamp_keeps_event() {
        let raw = r#"{"eventKind":"leave","userId":"u1","timestamp":"yesterday"}"#;
        let event = decode(raw, now()).unwrap();

        assert_eq!(event.kind, EventKind::Leave);
        assert!(event.timestamp.is_none());
        assert_eq!(event.seen_at(), now());
    }

    #[test]
    fn test_decode_timestamp_without_offset_is_utc() {
        let raw = r##"{"eventKind":"join","userId":"u1","name":"Ann","color":"#f00",
            "timestamp":"2024-05-01T11:30:00"}"##;
        let event = decode(raw, now()).unwrap();

        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 11, 30, 0).unwrap();
        assert_eq!(event.timestamp, Some(expected));
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T14:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T12:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("not a time"), None);
    }

    #[test]
    fn test_decode_presence_lenient_last_seen() {
        let raw = r##"{"eventKind":"presence","data":{"activeUsers":[
            {"userId":"u1","name":"Ann","color":"#f00","lastSeen":"2024-05-01T11:00:00"},
            {"userId":"u2","name":"Bo","color":"#0f0","lastSeen":"garbage"},
            {"userId":"u3","name":"Cy","color":"#00f","lastSeen":null}]}}"##;
        let event = decode(raw, now()).unwrap();

        let EventPayload::Presence(data) = event.payload else {
            panic!("Expected presence payload");
        };
        assert_eq!(
            data.active_users[0].last_seen,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap())
        );
        assert!(data.active_users[1].last_seen.is_none());
        assert!(data.active_users[2].last_seen.is_none());
    }

    #[test]
    fn test_outbound_cursor_encoding() {
        let msg = OutboundMessage::cursor(&CursorPosition::new(5.0, 5.0));
        let encoded = msg.encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["eventKind"], "cursor");
        assert_eq!(value["data"]["x"], 5.0);
        assert_eq!(value["data"]["y"], 5.0);
        // Optional text position is omitted, not sent as null.
        assert!(value["data"].get("line").is_none());
    }

    #[test]
    fn test_outbound_edit_encoding() {
        let msg = OutboundMessage::edit(serde_json::json!({"text": "hi"}));
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"eventKind": "edit", "data": {"text": "hi"}}));
    }

    #[test]
    fn test_event_kind_parse() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("Cursor".parse::<EventKind>().is_err());
    }
}
