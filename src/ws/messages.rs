use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::models::Participant;

// ==================== Client -> Server Messages ====================

/// Something the client asks the signaling service to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomIntent {
    Create,
    Join { room: String, user_id: String },
    ListParticipants { room: String },
    /// Ask whether a room exists before joining it
    VerifyRoom { room: String },
}

impl RoomIntent {
    pub fn join(room: impl Into<String>, user_id: impl Into<String>) -> Self {
        RoomIntent::Join {
            room: room.into(),
            user_id: user_id.into(),
        }
    }

    pub fn list_participants(room: impl Into<String>) -> Self {
        RoomIntent::ListParticipants { room: room.into() }
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            RoomIntent::Create => msg_types::CREATE,
            RoomIntent::Join { .. } => msg_types::JOIN,
            RoomIntent::ListParticipants { .. } => msg_types::LIST_PARTICIPANTS,
            RoomIntent::VerifyRoom { .. } => msg_types::VERIFY_ROOM,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ==================== Server -> Client Messages ====================

/// Outcome or state change reported by the signaling service.
///
/// Aliases accept the spellings older servers still send
/// (`CreateOK`, `Participants { users }`, `Error { message }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEvent {
    #[serde(alias = "CreateOK")]
    CreateOk { room_id: String },
    JoinOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    #[serde(alias = "Participants")]
    ParticipantsList {
        #[serde(alias = "users")]
        participants: Vec<Participant>,
    },
    Error {
        #[serde(alias = "message")]
        reason: String,
    },
    PeerJoined { user_id: String },
    VerifySuccess { room: String },
    VerifyError { error: String },
}

impl RoomEvent {
    pub fn msg_type(&self) -> &'static str {
        match self {
            RoomEvent::CreateOk { .. } => msg_types::CREATE_OK,
            RoomEvent::JoinOk { .. } => msg_types::JOIN_OK,
            RoomEvent::ParticipantsList { .. } => msg_types::PARTICIPANTS_LIST,
            RoomEvent::Error { .. } => msg_types::ERROR,
            RoomEvent::PeerJoined { .. } => msg_types::PEER_JOINED,
            RoomEvent::VerifySuccess { .. } => msg_types::VERIFY_SUCCESS,
            RoomEvent::VerifyError { .. } => msg_types::VERIFY_ERROR,
        }
    }
}

/// Decode one inbound text frame.
pub fn decode_event(text: &str) -> Result<RoomEvent, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let msg_type = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();

    if !msg_types::is_server_type(&msg_type) {
        return Err(DecodeError::UnknownType(msg_type));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
        msg_type,
        reason: e.to_string(),
    })
}

/// Message types enum for matching
pub mod msg_types {
    // Client -> Server
    pub const CREATE: &str = "Create";
    pub const JOIN: &str = "Join";
    pub const LIST_PARTICIPANTS: &str = "ListParticipants";
    pub const VERIFY_ROOM: &str = "VerifyRoom";

    // Server -> Client
    pub const CREATE_OK: &str = "CreateOk";
    pub const JOIN_OK: &str = "JoinOk";
    pub const PARTICIPANTS_LIST: &str = "ParticipantsList";
    pub const ERROR: &str = "Error";
    pub const PEER_JOINED: &str = "PeerJoined";
    pub const VERIFY_SUCCESS: &str = "VerifySuccess";
    pub const VERIFY_ERROR: &str = "VerifyError";

    const SERVER_ALIASES: &[&str] = &["CreateOK", "Participants"];

    pub fn is_server_type(msg_type: &str) -> bool {
        matches!(
            msg_type,
            CREATE_OK
                | JOIN_OK
                | PARTICIPANTS_LIST
                | ERROR
                | PEER_JOINED
                | VERIFY_SUCCESS
                | VERIFY_ERROR
        ) || SERVER_ALIASES.contains(&msg_type)
    }
}
