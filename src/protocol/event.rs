//! Inbound server events and the tagged-union parse step.
//!
//! The backend pushes JSON text frames shaped `{"type": "...", ...}`.
//! [`parse_event`] turns a frame into a [`ServerEvent`]:
//!
//! - a known tag with a well-formed body parses to its variant,
//! - an unknown tag parses to [`ServerEvent::Unknown`] so the controller can
//!   log and ignore it (forward compatibility),
//! - a known tag with a malformed body is a [`ProtocolError::Malformed`] —
//!   a real bug on one side of the wire, not something to swallow.
//!
//! Binary frames never reach this module: on the room socket they are always
//! raw little-endian 16-bit PCM for listener playback.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{HandRaise, Message, PlaybackMode, Room, User};

// ---------------------------------------------------------------------------
// ProtocolError
// ---------------------------------------------------------------------------

/// Errors raised while decoding an inbound text frame.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON at all.
    #[error("invalid JSON frame: {0}")]
    Json(String),

    /// The frame was JSON but carried no string `"type"` field.
    #[error("frame has no \"type\" field")]
    MissingType,

    /// A recognised event type whose body did not match the expected shape.
    #[error("malformed '{kind}' event: {detail}")]
    Malformed { kind: String, detail: String },
}

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// All message types the server may push on the room WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledgment.  `user` is the server's authoritative view
    /// of the local participant (returning-user reconciliation may override
    /// the client-supplied name and language); `room` is a full snapshot.
    Joined { user: User, room: Room },
    /// The speaker token moved.  Carries the full new queue.
    TokenChanged {
        speaker_id: Option<String>,
        #[serde(default)]
        queue: Vec<String>,
    },
    /// Direct answer to this client's `request_token`.
    TokenResponse {
        granted: bool,
        #[serde(default)]
        detail: Option<String>,
    },
    UserJoined { user: User },
    UserLeft { user_id: String },
    /// Speech-to-text of the current speaker, broadcast to the room.
    Transcription {
        user_id: String,
        text: String,
        is_final: bool,
    },
    /// A complete, non-streamed assistant message.
    BotResponse { message: Message },
    /// One incremental token of a streaming assistant message.
    BotText { text: String },
    BotTextComplete,
    /// The speaker barged in; the current streaming message is finalized
    /// as-is and must not absorb the next turn's tokens.
    BotResponseInterrupted,
    BotAudioStart,
    BotAudioEnd,
    ModeChanged {
        user_id: String,
        mode: PlaybackMode,
    },
    HandRaised { hand: HandRaise },
    HandLowered { id: String, user_id: String },
    HandAcknowledged { id: String },
    HandDismissed { id: String },
    ReactionUpdate {
        message_id: String,
        emoji: String,
        count: u32,
    },
    TopicSuggestions { topics: Vec<String> },
    LessonTopicChanged { topic: String },
    TeacherChanged { teacher_id: Option<String> },
    TeacherActionResult {
        success: bool,
        #[serde(default)]
        detail: Option<String>,
    },
    /// The local user was removed from the room by a teacher/admin.
    Kicked {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Server-side error report for a rejected command.
    Error {
        #[serde(default)]
        detail: Option<String>,
    },
    /// An event type this client version does not understand.  Logged and
    /// ignored by the session controller.
    #[serde(skip)]
    Unknown { kind: String },
}

/// Tags this client version understands.  Kept in sync with the variants
/// above; anything else parses to [`ServerEvent::Unknown`].
const KNOWN_EVENT_TYPES: &[&str] = &[
    "joined",
    "token_changed",
    "token_response",
    "user_joined",
    "user_left",
    "transcription",
    "bot_response",
    "bot_text",
    "bot_text_complete",
    "bot_response_interrupted",
    "bot_audio_start",
    "bot_audio_end",
    "mode_changed",
    "hand_raised",
    "hand_lowered",
    "hand_acknowledged",
    "hand_dismissed",
    "reaction_update",
    "topic_suggestions",
    "lesson_topic_changed",
    "teacher_changed",
    "teacher_action_result",
    "kicked",
    "error",
];

// ---------------------------------------------------------------------------
// parse_event
// ---------------------------------------------------------------------------

/// Decode one inbound text frame.
///
/// See the module docs for the three possible outcomes.
pub fn parse_event(frame: &str) -> Result<ServerEvent, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(frame).map_err(|e| ProtocolError::Json(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !KNOWN_EVENT_TYPES.contains(&kind.as_str()) {
        return Ok(ServerEvent::Unknown { kind });
    }

    serde_json::from_value::<ServerEvent>(value).map_err(|e| ProtocolError::Malformed {
        kind,
        detail: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
