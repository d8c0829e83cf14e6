use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// A relayed payload, kept as the exact text the sender put on the wire.
pub type Frame = Arc<str>;

/// Message types handled by the core. Free-form relay types may not reuse them.
pub const CORE_TYPES: &[&str] = &[
    "join",
    "ready",
    "offer",
    "answer",
    "ice",
    "heartbeat",
    "ping",
    "pong",
    "peer_obstructed",
    "peer_restored",
    "collapse",
    "rejected",
];

pub const DEFAULT_RELAY_TYPES: &[&str] = &["text", "chat", "reaction", "cursor", "ui"];

/// Negotiation role handed to each occupant when a session pairs.
///
/// The first seat is always the initiator; the second seat is the polite side
/// that yields when both peers start negotiating at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Polite,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Polite => "polite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Offer,
    Answer,
}

impl DescriptorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptorKind::Offer => "offer",
            DescriptorKind::Answer => "answer",
        }
    }
}

/// Messages a peer sends to the core, after envelope decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Take a seat in the session identified by `address`.
    Join { address: String },
    /// Session description (offer or answer). Gates candidate delivery.
    Descriptor { kind: DescriptorKind, frame: Frame },
    /// Connectivity candidate, buffered until the sender's descriptor went out.
    Candidate { frame: Frame },
    /// Liveness refresh. `foreground: Some(false)` signals backgrounding.
    Heartbeat { foreground: Option<bool> },
    /// The sender reports its peer as unstable.
    PeerObstructed {
        reason: Option<String>,
        seconds: Option<u64>,
    },
    /// The sender reports that an obstruction has cleared.
    PeerRestored { reason: Option<String> },
    /// The sender is leaving the session for good.
    Collapse { reason: Option<String> },
    /// Configured free-form type, forwarded verbatim.
    Relay { kind: String, frame: Frame },
    /// Well-formed envelope with a type nobody handles. Ignored.
    Unrecognized { kind: String },
}

/// Messages the core generates for peers. Relayed frames are sent verbatim and
/// never pass through this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ready { role: Role, address: String },
    PeerObstructed { reason: String, seconds: u64 },
    PeerRestored { reason: String },
    Collapse { reason: String },
    Rejected { reason: String },
    Pong,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Ready { .. } => "ready",
            ServerMessage::PeerObstructed { .. } => "peer_obstructed",
            ServerMessage::PeerRestored { .. } => "peer_restored",
            ServerMessage::Collapse { .. } => "collapse",
            ServerMessage::Rejected { .. } => "rejected",
            ServerMessage::Pong => "pong",
        }
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// Core message shapes as they appear on the wire. Relayed types only need
/// their tag to be checked; the body stays opaque.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage {
    Join {
        address: String,
    },
    Offer {},
    Answer {},
    Ice {},
    #[serde(alias = "ping")]
    Heartbeat {
        #[serde(default)]
        foreground: Option<bool>,
    },
    PeerObstructed {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        seconds: Option<u64>,
    },
    PeerRestored {
        #[serde(default)]
        reason: Option<String>,
    },
    Collapse {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame is not a JSON object with a string `type` field")]
    MissingType,
    #[error("invalid `{kind}` message: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

impl EnvelopeError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            EnvelopeError::InvalidJson(_) => "invalid_json",
            EnvelopeError::MissingType => "missing_type",
            EnvelopeError::InvalidFields { .. } => "invalid_fields",
            EnvelopeError::NotUtf8 => "not_utf8",
        }
    }
}

/// The set of free-form message types forwarded without inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTypes {
    kinds: BTreeSet<String>,
}

impl RelayTypes {
    pub fn new<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: kinds
                .into_iter()
                .map(Into::into)
                .map(|kind: String| kind.trim().to_string())
                .filter(|kind| !kind.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    /// First configured type that collides with a core message type, if any.
    pub fn shadowed_core_type(&self) -> Option<&str> {
        self.kinds
            .iter()
            .map(String::as_str)
            .find(|kind| CORE_TYPES.contains(kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.kinds.iter().map(String::as_str)
    }
}

impl Default for RelayTypes {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_TYPES.iter().copied())
    }
}

/// Decode one text frame into a [`ClientMessage`].
pub fn decode_text(text: &str, relay_types: &RelayTypes) -> Result<ClientMessage, EnvelopeError> {
    let value: Value = serde_json::from_str(text).map_err(EnvelopeError::InvalidJson)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(EnvelopeError::MissingType)?
        .to_string();

    if relay_types.contains(&kind) {
        return Ok(ClientMessage::Relay {
            kind,
            frame: Frame::from(text),
        });
    }

    if !CORE_TYPES.contains(&kind.as_str()) {
        return Ok(ClientMessage::Unrecognized { kind });
    }

    let wire: WireMessage = match serde_json::from_value(value) {
        Ok(wire) => wire,
        Err(source) => {
            // Server-only types such as `ready` land here too.
            if matches!(kind.as_str(), "ready" | "pong" | "rejected") {
                return Ok(ClientMessage::Unrecognized { kind });
            }
            return Err(EnvelopeError::InvalidFields { kind, source });
        }
    };

    Ok(match wire {
        WireMessage::Join { address } => ClientMessage::Join { address },
        WireMessage::Offer {} => ClientMessage::Descriptor {
            kind: DescriptorKind::Offer,
            frame: Frame::from(text),
        },
        WireMessage::Answer {} => ClientMessage::Descriptor {
            kind: DescriptorKind::Answer,
            frame: Frame::from(text),
        },
        WireMessage::Ice {} => ClientMessage::Candidate {
            frame: Frame::from(text),
        },
        WireMessage::Heartbeat { foreground } => ClientMessage::Heartbeat { foreground },
        WireMessage::PeerObstructed { reason, seconds } => {
            ClientMessage::PeerObstructed { reason, seconds }
        }
        WireMessage::PeerRestored { reason } => ClientMessage::PeerRestored { reason },
        WireMessage::Collapse { reason } => ClientMessage::Collapse { reason },
    })
}

/// Binary frames are accepted when they carry UTF-8 JSON.
pub fn decode_binary(
    bytes: &[u8],
    relay_types: &RelayTypes,
) -> Result<ClientMessage, EnvelopeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| EnvelopeError::NotUtf8)?;
    decode_text(text, relay_types)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Result<ClientMessage, EnvelopeError> {
        decode_text(text, &RelayTypes::default())
    }

    #[test_timeout::timeout]
    fn join_carries_address() {
        let msg = decode(r#"{"type":"join","address":"ABCD"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                address: "ABCD".into()
            }
        );
    }

    #[test_timeout::timeout]
    fn descriptors_and_candidates_keep_original_text() {
        let offer = r#"{"type":"offer","sdp":"v=0\r\n","extra":[1,2]}"#;
        match decode(offer).unwrap() {
            ClientMessage::Descriptor { kind, frame } => {
                assert_eq!(kind, DescriptorKind::Offer);
                assert_eq!(&*frame, offer);
            }
            other => panic!("unexpected {other:?}"),
        }

        let ice = r#"{"type":"ice","candidate":{"candidate":"candidate:1 1 udp"}}"#;
        match decode(ice).unwrap() {
            ClientMessage::Candidate { frame } => assert_eq!(&*frame, ice),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn ping_is_a_heartbeat_alias() {
        assert_eq!(
            decode(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Heartbeat { foreground: None }
        );
        assert_eq!(
            decode(r#"{"type":"heartbeat","foreground":false}"#).unwrap(),
            ClientMessage::Heartbeat {
                foreground: Some(false)
            }
        );
    }

    #[test_timeout::timeout]
    fn obstruction_fields_are_optional() {
        assert_eq!(
            decode(r#"{"type":"peer_obstructed"}"#).unwrap(),
            ClientMessage::PeerObstructed {
                reason: None,
                seconds: None
            }
        );
        assert_eq!(
            decode(r#"{"type":"peer_obstructed","reason":"backgrounded","seconds":10}"#).unwrap(),
            ClientMessage::PeerObstructed {
                reason: Some("backgrounded".into()),
                seconds: Some(10)
            }
        );
    }

    #[test_timeout::timeout]
    fn free_form_types_relay_verbatim() {
        let text = r#"{"type":"chat","body":"hi"}"#;
        match decode(text).unwrap() {
            ClientMessage::Relay { kind, frame } => {
                assert_eq!(kind, "chat");
                assert_eq!(&*frame, text);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn unknown_types_fall_through() {
        assert_eq!(
            decode(r#"{"type":"teleport"}"#).unwrap(),
            ClientMessage::Unrecognized {
                kind: "teleport".into()
            }
        );
        assert_eq!(
            decode(r#"{"type":"ready","role":"initiator","address":"x"}"#).unwrap(),
            ClientMessage::Unrecognized {
                kind: "ready".into()
            }
        );
    }

    #[test_timeout::timeout]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            decode("not json"),
            Err(EnvelopeError::InvalidJson(_))
        ));
        assert!(matches!(decode(r#"{"kind":"join"}"#), Err(EnvelopeError::MissingType)));
        assert!(matches!(decode(r#"[1,2]"#), Err(EnvelopeError::MissingType)));
        assert!(matches!(
            decode(r#"{"type":"join"}"#),
            Err(EnvelopeError::InvalidFields { .. })
        ));
        assert!(matches!(
            decode_binary(&[0xff, 0xfe], &RelayTypes::default()),
            Err(EnvelopeError::NotUtf8)
        ));
    }

    #[test_timeout::timeout]
    fn binary_utf8_frames_decode_like_text() {
        let relay_types = RelayTypes::default();
        for text in [
            r#"{"type":"join","address":"ABCD"}"#,
            r#"{"type":"ice","candidate":"candidate:1 1 udp 1 10.0.0.2 5000 typ host"}"#,
            r#"{"type":"chat","text":"héllo"}"#,
            r#"{"type":"heartbeat","foreground":false}"#,
        ] {
            assert_eq!(
                decode_binary(text.as_bytes(), &relay_types).unwrap(),
                decode_text(text, &relay_types).unwrap()
            );
        }
        match decode_binary(br#"{"type":"offer","sdp":"v=0"}"#, &relay_types).unwrap() {
            ClientMessage::Descriptor { kind, frame } => {
                assert_eq!(kind, DescriptorKind::Offer);
                assert_eq!(&*frame, r#"{"type":"offer","sdp":"v=0"}"#);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn relay_types_detect_core_collisions() {
        let types = RelayTypes::new(["chat", " offer ", ""]);
        assert!(types.contains("offer"));
        assert_eq!(types.shadowed_core_type(), Some("offer"));
        assert_eq!(RelayTypes::default().shadowed_core_type(), None);
    }

    #[test_timeout::timeout]
    fn server_messages_are_type_tagged() {
        let ready = ServerMessage::Ready {
            role: Role::Polite,
            address: "ABCD".into(),
        };
        let value: Value = serde_json::from_str(&ready.to_frame().unwrap()).unwrap();
        assert_eq!(value["type"], "ready");
        assert_eq!(value["role"], "polite");
        assert_eq!(value["address"], "ABCD");

        let pong: Value = serde_json::from_str(&ServerMessage::Pong.to_frame().unwrap()).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));
    }
}
