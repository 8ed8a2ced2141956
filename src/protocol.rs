//! Wire protocol for client↔relay and peer↔peer traffic.
//!
//! Every frame carries one JSON [`Envelope`]: a type discriminator, a routing
//! identifier, an opaque per-type payload, and a sender timestamp. Payload
//! fields holding raw bytes are base64 inside the textual envelope. Payloads
//! are only decoded when the message type calls for it.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("message has no payload")]
    MissingPayload,
}

/// Relay-reported error codes carried in [`ErrorPayload`].
pub mod error_code {
    pub const ROOM_NOT_FOUND: &str = "ROOM_NOT_FOUND";
    pub const ROOM_FULL: &str = "ROOM_FULL";
    pub const CODE_MISMATCH: &str = "CODE_MISMATCH";
    pub const PAKE_FAILED: &str = "PAKE_FAILED";
    pub const TRANSFER_FAILED: &str = "TRANSFER_FAILED";
    pub const TIMEOUT: &str = "TIMEOUT";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "CREATE_ROOM")]
    CreateRoom,
    #[serde(rename = "JOIN_ROOM")]
    JoinRoom,
    #[serde(rename = "CREATE_PERSISTENT")]
    CreatePersistent,
    #[serde(rename = "JOIN_BY_ID")]
    JoinById,
    #[serde(rename = "ROOM_JOINED")]
    RoomJoined,
    #[serde(rename = "ROOM_READY")]
    RoomReady,
    #[serde(rename = "PAKE_A")]
    PakeA,
    #[serde(rename = "PAKE_B")]
    PakeB,
    #[serde(rename = "ENCRYPTED")]
    Encrypted,
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "CLOSE")]
    Close,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::CreateRoom => "CREATE_ROOM",
            MessageType::JoinRoom => "JOIN_ROOM",
            MessageType::CreatePersistent => "CREATE_PERSISTENT",
            MessageType::JoinById => "JOIN_BY_ID",
            MessageType::RoomJoined => "ROOM_JOINED",
            MessageType::RoomReady => "ROOM_READY",
            MessageType::PakeA => "PAKE_A",
            MessageType::PakeB => "PAKE_B",
            MessageType::Encrypted => "ENCRYPTED",
            MessageType::Ack => "ACK",
            MessageType::Error => "ERROR",
            MessageType::Close => "CLOSE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The on-the-wire unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Routing identifier; empty for room-creation requests.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room_id: String,

    /// Per-type payload, left opaque until the type demands decoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Sender wall-clock milliseconds at send time.
    #[serde(rename = "ts")]
    pub timestamp_ms: i64,
}

impl Envelope {
    pub fn new<T: Serialize>(
        kind: MessageType,
        room_id: &str,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Envelope {
            kind,
            room_id: room_id.to_string(),
            payload: Some(serde_json::to_value(payload)?),
            timestamp_ms: now_ms(),
        })
    }

    /// An envelope with no payload (`ROOM_READY`, `ACK`, `CLOSE`).
    pub fn bare(kind: MessageType, room_id: &str) -> Self {
        Envelope {
            kind,
            room_id: room_id.to_string(),
            payload: None,
            timestamp_ms: now_ms(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decodes the payload as the structure the message type prescribes.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let value = self
            .payload
            .clone()
            .ok_or(ProtocolError::MissingPayload)?;
        Ok(serde_json::from_value(value)?)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomPayload {
    /// URL-safe base64 SHA-256 of the code phrase.
    pub code_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomPayload {
    pub code_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePersistentPayload {
    /// Hours until the room expires; negative means no expiry.
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinByIdPayload {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomJoinedPayload {
    /// Set for persistent creations so the client can recover the minted id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PakePayload {
    #[serde(with = "b64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Encrypted filename blob.
    #[serde(with = "b64")]
    pub filename: Vec<u8>,

    /// Encrypted content blob.
    #[serde(with = "b64")]
    pub data: Vec<u8>,

    /// Reserved for future chunking; always 1 today.
    pub total_parts: u32,

    /// Reserved for future chunking; always 0 today.
    pub part_num: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Base64 codec for byte-valued payload fields inside the JSON envelope.
pub(crate) mod b64 {
    use base64::{engine::general_purpose::URL_SAFE, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        URL_SAFE.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        URL_SAFE
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_every_type() {
        let envelopes = vec![
            Envelope::new(
                MessageType::CreateRoom,
                "hash",
                &CreateRoomPayload { code_hash: "hash".into() },
            )
            .unwrap(),
            Envelope::new(
                MessageType::JoinRoom,
                "hash",
                &JoinRoomPayload { code_hash: "hash".into() },
            )
            .unwrap(),
            Envelope::new(
                MessageType::CreatePersistent,
                "",
                &CreatePersistentPayload { ttl_hours: -1 },
            )
            .unwrap(),
            Envelope::new(
                MessageType::JoinById,
                "room",
                &JoinByIdPayload { room_id: "room".into() },
            )
            .unwrap(),
            Envelope::new(
                MessageType::RoomJoined,
                "room",
                &RoomJoinedPayload { room_id: Some("room".into()) },
            )
            .unwrap(),
            Envelope::bare(MessageType::RoomReady, "room"),
            Envelope::new(
                MessageType::PakeA,
                "room",
                &PakePayload { data: vec![1, 2, 3, 255] },
            )
            .unwrap(),
            Envelope::new(
                MessageType::PakeB,
                "room",
                &PakePayload { data: vec![] },
            )
            .unwrap(),
            Envelope::new(
                MessageType::Encrypted,
                "room",
                &EncryptedPayload {
                    filename: vec![9, 8, 7],
                    data: vec![0; 64],
                    total_parts: 1,
                    part_num: 0,
                },
            )
            .unwrap(),
            Envelope::bare(MessageType::Ack, "room"),
            Envelope::new(
                MessageType::Error,
                "room",
                &ErrorPayload {
                    code: error_code::ROOM_FULL.into(),
                    message: "room is full".into(),
                },
            )
            .unwrap(),
            Envelope::bare(MessageType::Close, "room"),
        ];

        for envelope in envelopes {
            let text = envelope.encode().unwrap();
            let decoded = Envelope::decode(&text).unwrap();
            assert_eq!(decoded, envelope, "round trip for {}", envelope.kind);
        }
    }

    #[test]
    fn test_type_discriminator_on_wire() {
        let envelope = Envelope::bare(MessageType::RoomReady, "r");
        let text = envelope.encode().unwrap();
        assert!(text.contains("\"type\":\"ROOM_READY\""));
        assert!(text.contains("\"ts\":"));
    }

    #[test]
    fn test_empty_room_id_omitted() {
        let envelope = Envelope::new(
            MessageType::CreatePersistent,
            "",
            &CreatePersistentPayload { ttl_hours: 4 },
        )
        .unwrap();
        let text = envelope.encode().unwrap();
        assert!(!text.contains("room_id"));

        let decoded = Envelope::decode(&text).unwrap();
        assert!(decoded.room_id.is_empty());
    }

    #[test]
    fn test_bytes_are_base64_strings() {
        let envelope = Envelope::new(
            MessageType::PakeA,
            "room",
            &PakePayload { data: vec![0xFF; 4] },
        )
        .unwrap();
        let text = envelope.encode().unwrap();
        // Raw bytes must never appear; only their base64 form.
        assert!(text.contains("\"data\":\"_____w==\""));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = Envelope::decode(r#"{"type":"TELEPORT","ts":0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_payload_reported() {
        let envelope = Envelope::bare(MessageType::Ack, "room");
        let result: Result<ErrorPayload, _> = envelope.payload();
        assert!(matches!(result, Err(ProtocolError::MissingPayload)));
    }

    #[test]
    fn test_payload_type_mismatch_rejected() {
        let envelope = Envelope::new(
            MessageType::Error,
            "room",
            &ErrorPayload { code: "X".into(), message: "y".into() },
        )
        .unwrap();
        let result: Result<EncryptedPayload, _> = envelope.payload();
        assert!(result.is_err());
    }

    #[test]
    fn test_timestamp_populated() {
        let envelope = Envelope::bare(MessageType::Close, "");
        assert!(envelope.timestamp_ms > 1_600_000_000_000);
    }
}
