//! Session state and the event reducer.
//!
//! All mutable session data lives in one [`ClassroomState`] value. Server
//! events are applied through [`ClassroomState::apply`], a synchronous
//! reducer: each event mutates the state in one call and returns the
//! [`SessionEvent`]s the change produced, so a reader holding the state lock
//! can never observe a half-applied event.
//!
//! The reducer never acts optimistically. Sending `request_token` changes
//! nothing locally; the speaker moves when (and only when) the server's
//! `token_changed` arrives.

use thiserror::Error;

use crate::model::{HandStatus, Message, PlaybackMode, Role, Room, User};
use crate::protocol::ServerEvent;

/// Display name attributed to streamed assistant messages that arrive
/// without their own metadata.
const ASSISTANT_NAME: &str = "Assistant";

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

/// Coarse lifecycle phase of the client.
///
/// `History`, `Dashboard` and `Settings` are read-only side screens; they are
/// reachable only from `Lobby` and lead only back to it, so no room state can
/// exist while one of them is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Lobby,
    Joining,
    Active,
    Error,
    History,
    Dashboard,
    Settings,
}

impl Default for SessionPhase {
    fn default() -> Self {
        Self::Lobby
    }
}

impl SessionPhase {
    /// Whether moving from `self` to `next` is a legal phase transition.
    pub fn may_transition(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Lobby, Joining) => true,
            (Lobby, History | Dashboard | Settings) => true,
            (History | Dashboard | Settings, Lobby) => true,
            (Joining, Active | Lobby | Error) => true,
            (Active, Lobby | Error) => true,
            (Error, Lobby) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("illegal phase transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionPhase,
        to: SessionPhase,
    },
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Typed notifications published to the embedder after state changes.
///
/// Message-shaped variants carry a clone of the affected message so the
/// embedder can render without re-locking the state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    /// The whole room snapshot was replaced (join or polling backstop).
    RoomUpdated,
    UsersChanged,
    MessageAdded(Message),
    /// A streaming tail grew, was finalized, or a reaction count changed.
    MessageUpdated(Message),
    /// Live partial transcript of the current speaker.
    TranscriptUpdated { user_id: String, text: String },
    TokenChanged { speaker_id: Option<String> },
    /// The server refused this client's `request_token`.
    TokenDenied { detail: Option<String> },
    HandsChanged,
    PlaybackModeChanged { user_id: String, mode: PlaybackMode },
    TopicSuggestions(Vec<String>),
    LessonTopicChanged(String),
    TeacherChanged { teacher_id: Option<String> },
    TeacherActionResult {
        success: bool,
        detail: Option<String>,
    },
    /// The bot started/stopped sending synthesized speech.
    BotAudio { active: bool },
    /// The local user was removed by a teacher; the controller tears the
    /// session down on seeing this.
    Kicked { reason: Option<String> },
    ServerError { detail: String },
    /// The room socket closed while the session was active.
    Disconnected,
}

// ---------------------------------------------------------------------------
// ClassroomState
// ---------------------------------------------------------------------------

/// Everything the client knows about the current session.
#[derive(Debug, Default)]
pub struct ClassroomState {
    phase: SessionPhase,
    /// Authoritative room snapshot. Meaningful only while joined.
    pub room: Room,
    /// The server's view of the local participant, set by `joined`.
    pub self_user: Option<User>,
    /// Append-only transcript; at most one entry is an open streaming tail.
    pub messages: Vec<Message>,
    /// Partial speech-to-text of the current speaker, if any.
    pub live_transcript: Option<(String, String)>,
    pub topic_suggestions: Vec<String>,
    pub last_error: Option<String>,
    pub bot_audio_active: bool,
    /// Index of the open streaming message.  Tracked explicitly rather than
    /// as "the last entry": a final barge-in transcript lands as a user
    /// message behind the tail, and the interruption must still find it.
    streaming_idx: Option<usize>,
    local_id_seq: u64,
}

impl ClassroomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Validated phase transition for embedder-driven navigation.
    pub fn set_phase(&mut self, next: SessionPhase) -> Result<(), StateError> {
        if !self.phase.may_transition(next) {
            return Err(StateError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Back to a pristine lobby. Used by `leave()` and the kick path.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn self_id(&self) -> Option<&str> {
        self.self_user.as_ref().map(|u| u.id.as_str())
    }

    pub fn is_self_speaker(&self) -> bool {
        matches!(self.self_id(), Some(id) if self.room.is_speaker(id))
    }

    pub fn is_self_teacher(&self) -> bool {
        matches!(self.self_id(), Some(id) if self.room.is_teacher(id))
    }

    fn next_local_id(&mut self) -> String {
        self.local_id_seq += 1;
        format!("local-{}", self.local_id_seq)
    }

    fn speaker_name(&self, user_id: &str) -> String {
        self.room
            .user(user_id)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| user_id.to_string())
    }

    // ---- streaming tail -------------------------------------------------

    /// Appends one bot token, opening a new tail message if none is open.
    fn append_bot_token(&mut self, token: &str) -> Message {
        match self.streaming_idx {
            Some(idx) => {
                let tail = &mut self.messages[idx];
                tail.text.push_str(token);
                tail.clone()
            }
            None => {
                let id = self.next_local_id();
                let mut message = Message::streaming_assistant(id, ASSISTANT_NAME);
                message.text.push_str(token);
                self.streaming_idx = Some(self.messages.len());
                self.messages.push(message.clone());
                message
            }
        }
    }

    /// Seals the streaming tail, if one is open. Finalized messages are
    /// immutable; the next token opens a fresh message.
    fn finalize_tail(&mut self) -> Option<Message> {
        let idx = self.streaming_idx.take()?;
        let tail = &mut self.messages[idx];
        tail.streaming = false;
        Some(tail.clone())
    }

    // ---- full replace ---------------------------------------------------

    /// Replace the room snapshot wholesale (polling backstop).
    pub fn replace_room(&mut self, room: Room) -> Vec<SessionEvent> {
        self.room = room;
        self.enforce_room_invariants();
        vec![SessionEvent::RoomUpdated]
    }

    /// The queue never contains the current speaker.
    fn enforce_room_invariants(&mut self) {
        if let Some(speaker) = self.room.speaker_id.clone() {
            self.room.token_queue.retain(|id| *id != speaker);
        }
    }

    // ---- the reducer ----------------------------------------------------

    /// Apply one server event and report the resulting changes.
    ///
    /// Events must be fed in arrival order; the reducer is where ordering
    /// guarantees of the socket become ordering guarantees of the state.
    pub fn apply(&mut self, event: ServerEvent) -> Vec<SessionEvent> {
        match event {
            ServerEvent::Joined { user, room } => {
                self.self_user = Some(user);
                self.room = room;
                self.enforce_room_invariants();
                self.phase = SessionPhase::Active;
                vec![
                    SessionEvent::PhaseChanged(SessionPhase::Active),
                    SessionEvent::RoomUpdated,
                ]
            }

            ServerEvent::TokenChanged { speaker_id, queue } => {
                self.room.speaker_id = speaker_id.clone();
                self.room.token_queue = queue;
                self.enforce_room_invariants();
                vec![SessionEvent::TokenChanged { speaker_id }]
            }

            ServerEvent::TokenResponse { granted, detail } => {
                if granted {
                    // Authoritative speaker change arrives as token_changed.
                    vec![]
                } else {
                    vec![SessionEvent::TokenDenied { detail }]
                }
            }

            ServerEvent::UserJoined { user } => {
                self.room.upsert_user(user);
                vec![SessionEvent::UsersChanged]
            }

            ServerEvent::UserLeft { user_id } => {
                self.room.remove_user(&user_id);
                let hands_before = self.room.hand_raises.len();
                self.room
                    .hand_raises
                    .retain(|h| h.user_id != user_id || h.status != HandStatus::Pending);
                let mut out = vec![SessionEvent::UsersChanged];
                if self.room.hand_raises.len() != hands_before {
                    out.push(SessionEvent::HandsChanged);
                }
                out
            }

            ServerEvent::Transcription {
                user_id,
                text,
                is_final,
            } => {
                if is_final {
                    let id = self.next_local_id();
                    let speaker = self.speaker_name(&user_id);
                    let message = Message::finalized(id, Role::User, speaker, text);
                    self.messages.push(message.clone());
                    self.live_transcript = None;
                    vec![SessionEvent::MessageAdded(message)]
                } else {
                    self.live_transcript = Some((user_id.clone(), text.clone()));
                    vec![SessionEvent::TranscriptUpdated { user_id, text }]
                }
            }

            ServerEvent::BotResponse { message } => {
                let mut out = Vec::new();
                if let Some(sealed) = self.finalize_tail() {
                    out.push(SessionEvent::MessageUpdated(sealed));
                }
                self.messages.push(message.clone());
                out.push(SessionEvent::MessageAdded(message));
                out
            }

            ServerEvent::BotText { text } => {
                let tail = self.append_bot_token(&text);
                vec![SessionEvent::MessageUpdated(tail)]
            }

            ServerEvent::BotTextComplete | ServerEvent::BotResponseInterrupted => {
                match self.finalize_tail() {
                    Some(sealed) => vec![SessionEvent::MessageUpdated(sealed)],
                    None => vec![],
                }
            }

            ServerEvent::BotAudioStart => {
                self.bot_audio_active = true;
                vec![SessionEvent::BotAudio { active: true }]
            }

            ServerEvent::BotAudioEnd => {
                self.bot_audio_active = false;
                vec![SessionEvent::BotAudio { active: false }]
            }

            ServerEvent::ModeChanged { user_id, mode } => {
                if let Some(user) = self.room.user_mut(&user_id) {
                    user.playback_mode = mode;
                }
                if let Some(me) = self.self_user.as_mut() {
                    if me.id == user_id {
                        me.playback_mode = mode;
                    }
                }
                vec![SessionEvent::PlaybackModeChanged { user_id, mode }]
            }

            ServerEvent::HandRaised { hand } => {
                // One pending hand per user: a new raise replaces the old.
                self.room
                    .hand_raises
                    .retain(|h| !(h.user_id == hand.user_id && h.status == HandStatus::Pending));
                self.room.hand_raises.push(hand);
                vec![SessionEvent::HandsChanged]
            }

            ServerEvent::HandLowered { id, .. } => {
                self.room.hand_raises.retain(|h| h.id != id);
                vec![SessionEvent::HandsChanged]
            }

            ServerEvent::HandAcknowledged { id } => {
                if let Some(hand) = self.room.hand_raises.iter_mut().find(|h| h.id == id) {
                    hand.status = HandStatus::Acknowledged;
                }
                vec![SessionEvent::HandsChanged]
            }

            ServerEvent::HandDismissed { id } => {
                if let Some(hand) = self.room.hand_raises.iter_mut().find(|h| h.id == id) {
                    hand.status = HandStatus::Dismissed;
                }
                vec![SessionEvent::HandsChanged]
            }

            ServerEvent::ReactionUpdate {
                message_id,
                emoji,
                count,
            } => {
                match self.messages.iter_mut().find(|m| m.id == message_id) {
                    Some(message) => {
                        message.reactions.insert(emoji, count);
                        vec![SessionEvent::MessageUpdated(message.clone())]
                    }
                    None => {
                        log::debug!("state: reaction for unknown message {message_id}");
                        vec![]
                    }
                }
            }

            ServerEvent::TopicSuggestions { topics } => {
                self.topic_suggestions = topics.clone();
                vec![SessionEvent::TopicSuggestions(topics)]
            }

            ServerEvent::LessonTopicChanged { topic } => {
                self.room.lesson_topic = topic.clone();
                vec![SessionEvent::LessonTopicChanged(topic)]
            }

            ServerEvent::TeacherChanged { teacher_id } => {
                self.room.teacher_id = teacher_id.clone();
                vec![SessionEvent::TeacherChanged { teacher_id }]
            }

            ServerEvent::TeacherActionResult { success, detail } => {
                vec![SessionEvent::TeacherActionResult { success, detail }]
            }

            ServerEvent::Kicked { reason } => vec![SessionEvent::Kicked { reason }],

            ServerEvent::Error { detail } => {
                let detail = detail.unwrap_or_else(|| "server reported an error".to_string());
                self.last_error = Some(detail.clone());
                vec![SessionEvent::ServerError { detail }]
            }

            ServerEvent::Unknown { kind } => {
                log::debug!("state: ignoring unknown event type '{kind}'");
                vec![]
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
