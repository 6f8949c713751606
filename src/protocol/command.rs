//! Outbound control commands sent as JSON text frames on the room socket.
//!
//! Every command is fire-and-forget: the client never mutates authoritative
//! room state when sending one.  State changes happen only when the server
//! answers with the corresponding [`ServerEvent`](crate::protocol::ServerEvent).

use serde::{Deserialize, Serialize};

use crate::model::PlaybackMode;

// ---------------------------------------------------------------------------
// ClientCommand
// ---------------------------------------------------------------------------

/// All message types the client may send on the room WebSocket.
///
/// Serialized with an internal `"type"` tag in snake_case, e.g.
/// `{"type":"request_token"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Connection handshake.  Carries the bearer token so the server can
    /// verify identity; the server answers with `joined` and may override
    /// `name` / `language` with persisted profile data.
    Join {
        user_id: String,
        name: String,
        language: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Change the local playback preference (text-only / text-and-audio).
    SetMode { mode: PlaybackMode },
    /// A typed chat message from the current speaker.
    TextMessage { text: String },
    RequestToken,
    ReleaseToken,
    PassToken { user_id: String },
    HandRaise {
        #[serde(skip_serializing_if = "Option::is_none")]
        preview: Option<String>,
    },
    HandLower,
    HandAcknowledge { id: String },
    HandDismiss { id: String },
    Reaction { message_id: String, emoji: String },
    /// Final speech transcript produced by the local voice bridge, relayed so
    /// the server can broadcast it to listeners.
    SpeakerTranscript { text: String, is_final: bool },
    /// Teacher moderation verb (e.g. `"kick"`, `"set_topic"`).
    TeacherAction {
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    RequestTopics,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
