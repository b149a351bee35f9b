//! Wire protocol: `{ "type": ..., "data": ... }` JSON envelopes
//!
//! Every message exchanged with the world server is an [`Envelope`]. The
//! `type` string selects one of a fixed set of payloads; decoding happens
//! once at the network boundary so the rest of the client only ever sees
//! concretely typed data.
//!
//! Decoding separates two failure modes:
//! - [`CodecError::UnknownType`]: well-formed JSON naming a type this client
//!   does not know. Servers may add types at any time, so callers ignore these.
//! - [`CodecError::Json`] / [`CodecError::Malformed`]: the frame itself is broken.

use crate::{
    ActorId, ChatScope, Customization, PresenceStatus, TradeSide, Vec3, DEFAULT_ANIMATION,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Discriminant of an [`Envelope`], used to key subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Join,
    Leave,
    PlayerUpdate,
    ChatMessage,
    TradeOffer,
    FriendRequest,
    FriendResponse,
    VoiceStatus,
    VoiceData,
    UserStatus,
    SocialActivity,
    InitialState,
    Ping,
}

impl MessageKind {
    pub const ALL: [MessageKind; 13] = [
        MessageKind::Join,
        MessageKind::Leave,
        MessageKind::PlayerUpdate,
        MessageKind::ChatMessage,
        MessageKind::TradeOffer,
        MessageKind::FriendRequest,
        MessageKind::FriendResponse,
        MessageKind::VoiceStatus,
        MessageKind::VoiceData,
        MessageKind::UserStatus,
        MessageKind::SocialActivity,
        MessageKind::InitialState,
        MessageKind::Ping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
            MessageKind::PlayerUpdate => "player_update",
            MessageKind::ChatMessage => "chat_message",
            MessageKind::TradeOffer => "trade_offer",
            MessageKind::FriendRequest => "friend_request",
            MessageKind::FriendResponse => "friend_response",
            MessageKind::VoiceStatus => "voice_status",
            MessageKind::VoiceData => "voice_data",
            MessageKind::UserStatus => "user_status",
            MessageKind::SocialActivity => "social_activity",
            MessageKind::InitialState => "initial_state",
            MessageKind::Ping => "ping",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_animation() -> String {
    DEFAULT_ANIMATION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinData {
    pub display_name: String,
    pub customization: Customization,
    pub position: Vec3,
    pub rotation: f32,
    pub animation: String,
}

/// One actor as listed in `initial_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorSnapshot {
    pub id: ActorId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub customization: Customization,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default = "default_animation")]
    pub animation: String,
    #[serde(default)]
    pub status: PresenceStatus,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialStateData {
    pub local_actor_id: ActorId,
    #[serde(default)]
    pub actors: Vec<ActorSnapshot>,
    #[serde(default)]
    pub chat_history: Vec<ChatMessageData>,
}

/// Kinematic update. `actor_id` is filled in by the server on relay and is
/// absent on outbound updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<ActorId>,
    pub position: Vec3,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default = "default_animation")]
    pub animation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customization: Option<Customization>,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveData {
    pub actor_id: ActorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSignal {
    pub symbol: String,
    pub side: TradeSide,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub scope: ChatScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ActorId>,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_signal: Option<TradeSignal>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeOfferData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ActorId>,
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub side: TradeSide,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender_id: ActorId,
    #[serde(default)]
    pub sender_display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ActorId>,
    #[serde(default)]
    pub timestamp: u64,
}

/// Answer to a friend request, keyed by the original request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendResponseData {
    pub request_id: String,
    pub sender_id: ActorId,
    #[serde(default)]
    pub sender_display_name: String,
    pub accepted: bool,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStatusData {
    pub actor_id: ActorId,
    pub enabled: bool,
    #[serde(default)]
    pub timestamp: u64,
}

/// One chunk of captured audio. `audio` is base64 text; a missing
/// `target_ids` means "everyone in range".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceDataPayload {
    pub actor_id: ActorId,
    pub audio: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ids: Option<Vec<ActorId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusData {
    pub actor_id: ActorId,
    pub status: PresenceStatus,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialActivityData {
    #[serde(rename = "type")]
    pub activity_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorId>,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Join(JoinData),
    Leave(LeaveData),
    PlayerUpdate(PlayerUpdateData),
    ChatMessage(ChatMessageData),
    TradeOffer(TradeOfferData),
    FriendRequest(FriendRequestData),
    FriendResponse(FriendResponseData),
    VoiceStatus(VoiceStatusData),
    VoiceData(VoiceDataPayload),
    UserStatus(UserStatusData),
    SocialActivity(SocialActivityData),
    InitialState(InitialStateData),
    Ping,
}

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug)]
pub enum CodecError {
    /// Not a `{type, data}` JSON object at all.
    Json(serde_json::Error),
    /// Well-formed envelope whose type this client does not know.
    UnknownType(String),
    /// Known type whose `data` does not match the expected payload.
    Malformed {
        kind: MessageKind,
        source: serde_json::Error,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "invalid envelope: {}", e),
            CodecError::UnknownType(kind) => write!(f, "unknown envelope type '{}'", kind),
            CodecError::Malformed { kind, source } => {
                write!(f, "malformed '{}' payload: {}", kind, source)
            }
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Json(e) => Some(e),
            CodecError::Malformed { source, .. } => Some(source),
            CodecError::UnknownType(_) => None,
        }
    }
}

fn payload<T: DeserializeOwned>(kind: MessageKind, data: Value) -> Result<T, CodecError> {
    serde_json::from_value(data).map_err(|source| CodecError::Malformed { kind, source })
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::Join(_) => MessageKind::Join,
            Envelope::Leave(_) => MessageKind::Leave,
            Envelope::PlayerUpdate(_) => MessageKind::PlayerUpdate,
            Envelope::ChatMessage(_) => MessageKind::ChatMessage,
            Envelope::TradeOffer(_) => MessageKind::TradeOffer,
            Envelope::FriendRequest(_) => MessageKind::FriendRequest,
            Envelope::FriendResponse(_) => MessageKind::FriendResponse,
            Envelope::VoiceStatus(_) => MessageKind::VoiceStatus,
            Envelope::VoiceData(_) => MessageKind::VoiceData,
            Envelope::UserStatus(_) => MessageKind::UserStatus,
            Envelope::SocialActivity(_) => MessageKind::SocialActivity,
            Envelope::InitialState(_) => MessageKind::InitialState,
            Envelope::Ping => MessageKind::Ping,
        }
    }

    /// Serializes to the JSON text frame sent over the socket.
    pub fn encode(&self) -> Result<String, CodecError> {
        let data = match self {
            Envelope::Join(d) => serde_json::to_value(d),
            Envelope::Leave(d) => serde_json::to_value(d),
            Envelope::PlayerUpdate(d) => serde_json::to_value(d),
            Envelope::ChatMessage(d) => serde_json::to_value(d),
            Envelope::TradeOffer(d) => serde_json::to_value(d),
            Envelope::FriendRequest(d) => serde_json::to_value(d),
            Envelope::FriendResponse(d) => serde_json::to_value(d),
            Envelope::VoiceStatus(d) => serde_json::to_value(d),
            Envelope::VoiceData(d) => serde_json::to_value(d),
            Envelope::UserStatus(d) => serde_json::to_value(d),
            Envelope::SocialActivity(d) => serde_json::to_value(d),
            Envelope::InitialState(d) => serde_json::to_value(d),
            Envelope::Ping => Ok(Value::Object(serde_json::Map::new())),
        }
        .map_err(CodecError::Json)?;

        let raw = RawEnvelope {
            kind: self.kind().as_str().to_string(),
            data,
        };
        serde_json::to_string(&raw).map_err(CodecError::Json)
    }

    /// Parses one inbound text frame.
    pub fn decode(text: &str) -> Result<Envelope, CodecError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(CodecError::Json)?;
        let kind =
            MessageKind::from_wire(&raw.kind).ok_or(CodecError::UnknownType(raw.kind))?;
        let data = raw.data;

        let envelope = match kind {
            MessageKind::Join => Envelope::Join(payload(kind, data)?),
            MessageKind::Leave => Envelope::Leave(payload(kind, data)?),
            MessageKind::PlayerUpdate => Envelope::PlayerUpdate(payload(kind, data)?),
            MessageKind::ChatMessage => Envelope::ChatMessage(payload(kind, data)?),
            MessageKind::TradeOffer => Envelope::TradeOffer(payload(kind, data)?),
            MessageKind::FriendRequest => Envelope::FriendRequest(payload(kind, data)?),
            MessageKind::FriendResponse => Envelope::FriendResponse(payload(kind, data)?),
            MessageKind::VoiceStatus => Envelope::VoiceStatus(payload(kind, data)?),
            MessageKind::VoiceData => Envelope::VoiceData(payload(kind, data)?),
            MessageKind::UserStatus => Envelope::UserStatus(payload(kind, data)?),
            MessageKind::SocialActivity => Envelope::SocialActivity(payload(kind, data)?),
            MessageKind::InitialState => Envelope::InitialState(payload(kind, data)?),
            MessageKind::Ping => Envelope::Ping,
        };
        Ok(envelope)
    }
}
