//! Signaling wire protocol
//!
//! Every control message travels in a flat `{event, data, name}` envelope;
//! for structured payloads (ICE candidates, SDP) `data` is itself
//! JSON-encoded. Server-side notifications use the separate
//! `{event, state, message}` shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vmeet_core::models::UserId;

use crate::types::ConnectionId;

/// Bidirectional control message envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub name: String,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            name: String::new(),
        }
    }

    /// Renegotiated SDP offer, `data` is the JSON-encoded session description.
    pub fn offer(sdp_json: impl Into<String>) -> Self {
        Self::new("offer", sdp_json)
    }

    /// Local ICE candidate, `data` is the JSON-encoded candidate.
    pub fn candidate(candidate_json: impl Into<String>) -> Self {
        Self::new("candidate", candidate_json)
    }
}

/// Server-side notification. `data` serializes as `message` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub state: String,
    #[serde(rename = "message")]
    pub data: Value,
}

impl Notification {
    pub fn new(state: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            event: "notification".to_string(),
            state: state.into(),
            data: data.into(),
        }
    }

    /// Typed error sent to a signaling session before termination.
    pub fn error(state: impl Into<String>, reason: impl Into<Value>) -> Self {
        Self {
            event: "error".to_string(),
            state: state.into(),
            data: reason.into(),
        }
    }
}

/// Client-originated control events, one variant per known `event` tag.
/// Unrecognized tags decode to `Unknown` so callers can treat them as a
/// distinct case instead of an open-ended string branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Join { token: String, display_name: String },
    Candidate(String),
    Answer(String),
    Close,
    PublicChat(String),
    StartRecord(String),
    StopRecord,
    ConfirmFile,
    GetUsers,
    Connection,
    SelfMute,
    SelfUnmute,
    RaiseHand,
    Expire(String),
    InitMeetRecord,
    StopMeetRecord,
    ApproveMeeting,
    Unknown(String),
}

impl From<Envelope> for ClientEvent {
    fn from(env: Envelope) -> Self {
        match env.event.as_str() {
            "join" => Self::Join {
                token: env.data,
                display_name: env.name,
            },
            "candidate" => Self::Candidate(env.data),
            "answer" => Self::Answer(env.data),
            "close" => Self::Close,
            "public_chat" => Self::PublicChat(env.data),
            "start_record" => Self::StartRecord(env.data),
            "stop_record" => Self::StopRecord,
            "confirm_file" => Self::ConfirmFile,
            "get_users" => Self::GetUsers,
            "connection" => Self::Connection,
            "self_mute" => Self::SelfMute,
            "self_unmute" => Self::SelfUnmute,
            "raise_hand" => Self::RaiseHand,
            "expire" => Self::Expire(env.data),
            "init_meet_record" => Self::InitMeetRecord,
            "stop_meet_record" => Self::StopMeetRecord,
            "approve_meeting" => Self::ApproveMeeting,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// One roster row in a `user_data` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterUser {
    pub display_name: String,
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub recorded_file: String,
    pub video_filename: Option<String>,
    pub audio_filename: Option<String>,
}

/// Roster snapshot broadcast to the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    pub users: Vec<RosterUser>,
}

/// Own identity sent to a freshly connected peer as `self_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDataMessage {
    #[serde(rename = "DisplayName")]
    pub display_name: String,
    pub connection_id: ConnectionId,
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_decodes_with_missing_fields() {
        let env: Envelope = serde_json::from_str(r#"{"event":"stop_record"}"#).expect("decode");
        assert_eq!(ClientEvent::from(env), ClientEvent::StopRecord);
    }

    #[test]
    fn test_join_event_carries_token_and_name() {
        let env: Envelope =
            serde_json::from_str(r#"{"event":"join","data":"tok123","name":"Ada"}"#)
                .expect("decode");
        assert_eq!(
            ClientEvent::from(env),
            ClientEvent::Join {
                token: "tok123".to_string(),
                display_name: "Ada".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_event_is_distinct() {
        let env: Envelope = serde_json::from_str(r#"{"event":"dance"}"#).expect("decode");
        assert_eq!(ClientEvent::from(env), ClientEvent::Unknown("dance".to_string()));
    }

    #[test]
    fn test_notification_data_serializes_as_message() {
        let n = Notification::new("connected", "hello");
        let json = serde_json::to_value(&n).expect("encode");
        assert_eq!(json["event"], "notification");
        assert_eq!(json["state"], "connected");
        assert_eq!(json["message"], "hello");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_error_envelope_shape() {
        let n = Notification::error("verification", "invalid token");
        let json = serde_json::to_value(&n).expect("encode");
        assert_eq!(json["event"], "error");
        assert_eq!(json["state"], "verification");
    }
}
