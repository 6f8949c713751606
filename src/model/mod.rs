//! Domain model for classroom sessions.
//!
//! These types mirror the backend's JSON shapes and are shared by the wire
//! protocol ([`crate::protocol`]), the REST client ([`crate::api`]) and the
//! session state ([`crate::session`]).
//!
//! Two derived facts are deliberately **not** stored on [`User`]:
//! whether a user is the current speaker or the teacher.  Both are pure
//! functions of `(room.speaker_id, room.teacher_id, user.id)` — see
//! [`Room::is_speaker`] / [`Room::is_teacher`] — so the client can never hold
//! a speaker flag that contradicts the room record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PlaybackMode
// ---------------------------------------------------------------------------

/// How a participant consumes assistant output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Transcript only — no audio is queued for this participant.
    TextOnly,
    /// Transcript plus synthesized speech played through the audio queue.
    TextAndAudio,
}

impl Default for PlaybackMode {
    fn default() -> Self {
        Self::TextAndAudio
    }
}

// ---------------------------------------------------------------------------
// RoomType
// ---------------------------------------------------------------------------

/// Governs how the speaker token moves between participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    /// The teacher controls the floor; listeners raise hands.
    TeacherDriven,
    /// Open discussion — the token is granted first-come first-served.
    Discussion,
}

impl Default for RoomType {
    fn default() -> Self {
        Self::TeacherDriven
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A connected participant.
///
/// Created from the server's `user_joined` / `joined` payloads, updated on
/// `mode_changed`, removed on `user_left`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    /// Preferred language as an ISO-639-1 code (e.g. `"en"`, `"sw"`).
    pub language: String,
    #[serde(default)]
    pub playback_mode: PlaybackMode,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the append-only transcript.
///
/// A message with `streaming == true` is the single mutable tail of the log:
/// incremental tokens are appended to `text` in place until the message is
/// finalized, after which it is never touched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// Display name of the speaker this message is attributed to.
    pub speaker: String,
    pub text: String,
    /// Set when the backend delivered a translated rendition of the text.
    #[serde(default)]
    pub translated: bool,
    /// Emoji → count.  Ordered map so renders are stable.
    #[serde(default)]
    pub reactions: BTreeMap<String, u32>,
    #[serde(default)]
    pub streaming: bool,
}

impl Message {
    /// A finalized (immutable) message.
    pub fn finalized(id: impl Into<String>, role: Role, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            speaker: speaker.into(),
            text: text.into(),
            translated: false,
            reactions: BTreeMap::new(),
            streaming: false,
        }
    }

    /// An empty assistant message that will accumulate streamed tokens.
    pub fn streaming_assistant(id: impl Into<String>, speaker: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            speaker: speaker.into(),
            text: String::new(),
            translated: false,
            reactions: BTreeMap::new(),
            streaming: true,
        }
    }
}

// ---------------------------------------------------------------------------
// HandRaise
// ---------------------------------------------------------------------------

/// Lifecycle of a hand raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandStatus {
    Pending,
    Acknowledged,
    Dismissed,
}

/// A listener's queued request for the speaker token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandRaise {
    pub id: String,
    pub user_id: String,
    /// Optional one-line preview of the question the listener wants to ask.
    #[serde(default)]
    pub preview: Option<String>,
    pub status: HandStatus,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// Full room snapshot as owned by the backend.
///
/// Invariants maintained by [`crate::session::ClassroomState`] when applying
/// server events:
/// - at most one user holds the speaker token (`speaker_id`),
/// - `token_queue` never contains the current speaker,
/// - at most one `Pending` hand raise exists per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub speaker_id: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<String>,
    /// User ids waiting for the token, in request order.
    #[serde(default)]
    pub token_queue: Vec<String>,
    #[serde(default)]
    pub hand_raises: Vec<HandRaise>,
    #[serde(default)]
    pub lesson_topic: String,
    #[serde(default)]
    pub room_type: RoomType,
}

impl Room {
    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == user_id)
    }

    pub fn user_mut(&mut self, user_id: &str) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == user_id)
    }

    /// `true` iff `user_id` currently holds the speaker token.
    pub fn is_speaker(&self, user_id: &str) -> bool {
        self.speaker_id.as_deref() == Some(user_id)
    }

    /// `true` iff `user_id` is the room's teacher.
    pub fn is_teacher(&self, user_id: &str) -> bool {
        self.teacher_id.as_deref() == Some(user_id)
    }

    /// Insert or update a user, preserving join order for existing users.
    pub fn upsert_user(&mut self, user: User) {
        match self.user_mut(&user.id) {
            Some(existing) => *existing = user,
            None => self.users.push(user),
        }
    }

    pub fn remove_user(&mut self, user_id: &str) {
        self.users.retain(|u| u.id != user_id);
        self.token_queue.retain(|id| id != user_id);
    }

    /// The pending hand raise for `user_id`, if any.
    pub fn pending_hand(&self, user_id: &str) -> Option<&HandRaise> {
        self.hand_raises
            .iter()
            .find(|h| h.user_id == user_id && h.status == HandStatus::Pending)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            name: format!("name-{id}"),
            language: "en".into(),
            playback_mode: PlaybackMode::default(),
        }
    }

    // ---- derived speaker / teacher flags ---

    #[test]
    fn is_speaker_tracks_speaker_id_exactly() {
        let mut room = Room::default();
        room.upsert_user(user("a"));
        room.upsert_user(user("b"));

        assert!(!room.is_speaker("a"));

        room.speaker_id = Some("a".into());
        assert!(room.is_speaker("a"));
        assert!(!room.is_speaker("b"));

        room.speaker_id = Some("b".into());
        assert!(!room.is_speaker("a"));
        assert!(room.is_speaker("b"));
    }

    #[test]
    fn is_teacher_tracks_teacher_id() {
        let mut room = Room::default();
        room.teacher_id = Some("t".into());
        assert!(room.is_teacher("t"));
        assert!(!room.is_teacher("x"));
    }

    // ---- upsert / remove ---

    #[test]
    fn upsert_replaces_existing_user_in_place() {
        let mut room = Room::default();
        room.upsert_user(user("a"));
        room.upsert_user(user("b"));

        let mut updated = user("a");
        updated.playback_mode = PlaybackMode::TextOnly;
        room.upsert_user(updated);

        assert_eq!(room.users.len(), 2);
        assert_eq!(room.users[0].id, "a"); // join order preserved
        assert_eq!(room.users[0].playback_mode, PlaybackMode::TextOnly);
    }

    #[test]
    fn remove_user_also_drops_queue_entry() {
        let mut room = Room::default();
        room.upsert_user(user("a"));
        room.token_queue.push("a".into());

        room.remove_user("a");
        assert!(room.users.is_empty());
        assert!(room.token_queue.is_empty());
    }

    // ---- hand raises ---

    #[test]
    fn pending_hand_ignores_resolved_entries() {
        let mut room = Room::default();
        room.hand_raises.push(HandRaise {
            id: "h1".into(),
            user_id: "a".into(),
            preview: None,
            status: HandStatus::Dismissed,
        });
        assert!(room.pending_hand("a").is_none());

        room.hand_raises.push(HandRaise {
            id: "h2".into(),
            user_id: "a".into(),
            preview: Some("why?".into()),
            status: HandStatus::Pending,
        });
        assert_eq!(room.pending_hand("a").map(|h| h.id.as_str()), Some("h2"));
    }

    // ---- serde shapes ---

    #[test]
    fn playback_mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PlaybackMode::TextAndAudio).unwrap(),
            "\"text_and_audio\""
        );
        assert_eq!(
            serde_json::to_string(&PlaybackMode::TextOnly).unwrap(),
            "\"text_only\""
        );
    }

    #[test]
    fn room_deserializes_with_missing_optional_fields() {
        let json = r#"{"id":"r1","name":"Algebra"}"#;
        let room: Room = serde_json::from_str(json).unwrap();
        assert_eq!(room.id, "r1");
        assert!(room.users.is_empty());
        assert!(room.speaker_id.is_none());
        assert_eq!(room.room_type, RoomType::TeacherDriven);
    }

    #[test]
    fn message_constructors() {
        let m = Message::finalized("m1", Role::User, "Asha", "hello");
        assert!(!m.streaming);
        assert_eq!(m.text, "hello");

        let s = Message::streaming_assistant("m2", "Tutor");
        assert!(s.streaming);
        assert!(s.text.is_empty());
        assert_eq!(s.role, Role::Assistant);
    }
}
