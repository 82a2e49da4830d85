//! The `{type, data}` unit exchanged with subscribers.
//!
//! Outbound envelopes are serialized once and those exact bytes are signed.
//! Inbound envelopes are decoded in two steps: the discriminator first, then
//! the payload matching it, so an unknown type is reported as unsupported
//! rather than as a parse failure.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EnvelopeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    NewEvent(NewEventPayload),
    DeleteEvent(DeleteEventPayload),
    NewGame(GamePayload),
    UpdateGame(GamePayload),
    DeleteGame(DeleteGamePayload),
    AddParticipant(AddParticipantPayload),
    RemoveParticipant(RemoveParticipantPayload),
    TestWebhook(TestPayload),
    SendMessage(SendMessagePayload),
}

/// Discriminator of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    NewEvent,
    DeleteEvent,
    NewGame,
    UpdateGame,
    DeleteGame,
    AddParticipant,
    RemoveParticipant,
    TestWebhook,
    SendMessage,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 9] = [
        EnvelopeKind::NewEvent,
        EnvelopeKind::DeleteEvent,
        EnvelopeKind::NewGame,
        EnvelopeKind::UpdateGame,
        EnvelopeKind::DeleteGame,
        EnvelopeKind::AddParticipant,
        EnvelopeKind::RemoveParticipant,
        EnvelopeKind::TestWebhook,
        EnvelopeKind::SendMessage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::NewEvent => "new_event",
            EnvelopeKind::DeleteEvent => "delete_event",
            EnvelopeKind::NewGame => "new_game",
            EnvelopeKind::UpdateGame => "update_game",
            EnvelopeKind::DeleteGame => "delete_game",
            EnvelopeKind::AddParticipant => "add_participant",
            EnvelopeKind::RemoveParticipant => "remove_participant",
            EnvelopeKind::TestWebhook => "test_webhook",
            EnvelopeKind::SendMessage => "send_message",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// `send_message` is accepted inbound only.
    pub fn is_outbound(self) -> bool {
        self != EnvelopeKind::SendMessage
    }

    fn decode(self, data: Value) -> Result<Envelope, serde_json::Error> {
        Ok(match self {
            EnvelopeKind::NewEvent => Envelope::NewEvent(serde_json::from_value(data)?),
            EnvelopeKind::DeleteEvent => Envelope::DeleteEvent(serde_json::from_value(data)?),
            EnvelopeKind::NewGame => Envelope::NewGame(serde_json::from_value(data)?),
            EnvelopeKind::UpdateGame => Envelope::UpdateGame(serde_json::from_value(data)?),
            EnvelopeKind::DeleteGame => Envelope::DeleteGame(serde_json::from_value(data)?),
            EnvelopeKind::AddParticipant => Envelope::AddParticipant(serde_json::from_value(data)?),
            EnvelopeKind::RemoveParticipant => Envelope::RemoveParticipant(serde_json::from_value(data)?),
            EnvelopeKind::TestWebhook => Envelope::TestWebhook(serde_json::from_value(data)?),
            EnvelopeKind::SendMessage => Envelope::SendMessage(serde_json::from_value(data)?),
        })
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::NewEvent(_) => EnvelopeKind::NewEvent,
            Envelope::DeleteEvent(_) => EnvelopeKind::DeleteEvent,
            Envelope::NewGame(_) => EnvelopeKind::NewGame,
            Envelope::UpdateGame(_) => EnvelopeKind::UpdateGame,
            Envelope::DeleteGame(_) => EnvelopeKind::DeleteGame,
            Envelope::AddParticipant(_) => EnvelopeKind::AddParticipant,
            Envelope::RemoveParticipant(_) => EnvelopeKind::RemoveParticipant,
            Envelope::TestWebhook(_) => EnvelopeKind::TestWebhook,
            Envelope::SendMessage(_) => EnvelopeKind::SendMessage,
        }
    }

    pub fn test(message: impl Into<String>) -> Self {
        Envelope::TestWebhook(TestPayload {
            message: message.into(),
        })
    }

    /// Canonical bytes: the exact body that is hashed, signed and sent.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)
            .map_err(|err| EnvelopeError::Malformed(err.to_string()))?;

        let kind = EnvelopeKind::parse(&raw.kind)
            .ok_or_else(|| EnvelopeError::Unsupported(raw.kind.clone()))?;

        kind.decode(raw.data)
            .map_err(|err| EnvelopeError::Malformed(err.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewEventPayload {
    pub id: String,
    pub chat_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub name: String,
    pub message_id: Option<i64>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteEventPayload {
    pub event_id: String,
    pub user_id: i64,
    pub user_name: String,
    pub name: String,
    pub deleted_at: DateTime<Utc>,
}

/// Board-game metadata link carried with game payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BggInfo {
    pub is_set: bool,
    pub id: Option<i64>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

/// Shared by `new_game` and `update_game`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GamePayload {
    pub id: String,
    pub event_id: String,
    pub user_id: i64,
    pub user_name: String,
    pub name: String,
    pub max_players: u32,
    pub message_id: Option<i64>,
    pub bgg: BggInfo,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteGamePayload {
    pub event_id: String,
    pub id: String,
    pub user_id: i64,
    pub user_name: String,
    pub name: String,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddParticipantPayload {
    pub event_id: String,
    pub game_id: String,
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoveParticipantPayload {
    pub event_id: String,
    pub game_id: String,
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub removed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPayload {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendMessagePayload {
    pub message: String,
    pub user_name: Option<String>,
}
