//! Voice bridge: a second WebSocket carrying the speaker's live audio turn.
//!
//! While a user holds the floor token with voice input enabled, the client
//! opens an independent connection to the voice backend and streams
//! microphone PCM up as binary frames. The backend answers with:
//! * partial and final speech-to-text of the speaker,
//! * incremental bot response tokens,
//! * turn-complete / turn-interrupted markers.
//!
//! The bridge is strictly optional: if it cannot connect, the session keeps
//! running on typed input. It never carries room state — that stays on the
//! room socket.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite};

use crate::config::InputMode;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The WebSocket connection to the voice backend could not be opened.
    #[error("bridge: connection failed: {0}")]
    Connect(String),
    /// Connected, but the init frame could not be delivered.
    #[error("bridge: handshake failed: {0}")]
    Handshake(String),
    /// The bridge has already shut down.
    #[error("bridge: connection closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What the voice backend reports back during a speaking turn.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Speech-to-text of the local speaker, partial until `is_final`.
    UserTranscript { text: String, is_final: bool },
    /// One incremental token of the bot's streamed answer.
    BotToken { text: String },
    /// The bot finished its answer; the streamed message is complete.
    TurnComplete,
    /// The speaker barged in; the streamed message ends where it stands.
    TurnInterrupted,
    /// The bridge socket closed (server side or network).
    Closed,
}

/// Wire shape of inbound bridge frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeFrame {
    UserTranscript {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    BotToken {
        text: String,
    },
    TurnComplete,
    TurnInterrupted,
}

impl From<BridgeFrame> for BridgeEvent {
    fn from(frame: BridgeFrame) -> Self {
        match frame {
            BridgeFrame::UserTranscript { text, is_final } => {
                BridgeEvent::UserTranscript { text, is_final }
            }
            BridgeFrame::BotToken { text } => BridgeEvent::BotToken { text },
            BridgeFrame::TurnComplete => BridgeEvent::TurnComplete,
            BridgeFrame::TurnInterrupted => BridgeEvent::TurnInterrupted,
        }
    }
}

fn parse_frame(text: &str) -> Option<BridgeEvent> {
    match serde_json::from_str::<BridgeFrame>(text) {
        Ok(frame) => Some(frame.into()),
        Err(err) => {
            log::debug!("bridge: ignoring unrecognized frame: {err}");
            None
        }
    }
}

fn init_frame(room_id: &str, speaker_id: &str) -> String {
    serde_json::json!({
        "type": "init",
        "room_id": room_id,
        "speaker_id": speaker_id,
    })
    .to_string()
}

/// Whether the bridge should be up for the given local conditions.
///
/// Only the current floor holder streams audio, and only when voice input
/// is selected; everyone else stays on the room socket.
pub fn should_activate(is_speaker: bool, input_mode: InputMode) -> bool {
    is_speaker && input_mode == InputMode::Voice
}

// ---------------------------------------------------------------------------
// VoiceBridge
// ---------------------------------------------------------------------------

const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// Handle to a live bridge connection.
///
/// Owns two tasks: one forwarding microphone PCM from [`send_audio`] to the
/// socket, one translating inbound frames into [`BridgeEvent`]s on the
/// channel given to [`connect`].
///
/// [`send_audio`]: VoiceBridge::send_audio
/// [`connect`]: VoiceBridge::connect
pub struct VoiceBridge {
    audio_tx: mpsc::Sender<Vec<u8>>,
    send_task: JoinHandle<()>,
    recv_task: JoinHandle<()>,
}

impl VoiceBridge {
    /// Connects to the voice backend and performs the init handshake.
    ///
    /// `events` receives everything the backend reports, ending with
    /// [`BridgeEvent::Closed`] when the socket goes away.
    pub async fn connect(
        url: &str,
        room_id: &str,
        speaker_id: &str,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Result<Self, BridgeError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| BridgeError::Connect(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = stream.split();

        ws_tx
            .send(tungstenite::Message::Text(
                init_frame(room_id, speaker_id).into(),
            ))
            .await
            .map_err(|e| BridgeError::Handshake(e.to_string()))?;
        log::info!("bridge: connected for speaker {speaker_id} in room {room_id}");

        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_CHANNEL_CAPACITY);

        let send_task = tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                if chunk.is_empty() {
                    continue;
                }
                if ws_tx
                    .send(tungstenite::Message::Binary(chunk.into()))
                    .await
                    .is_err()
                {
                    log::warn!("bridge: audio send failed, stopping uplink");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let recv_task = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(tungstenite::Message::Text(text)) => {
                        if let Some(event) = parse_frame(&text) {
                            if events.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(tungstenite::Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("bridge: socket error: {err}");
                        break;
                    }
                }
            }
            let _ = events.send(BridgeEvent::Closed).await;
        });

        Ok(Self {
            audio_tx,
            send_task,
            recv_task,
        })
    }

    /// Queues one chunk of raw little-endian i16 PCM for the uplink.
    pub async fn send_audio(&self, pcm: Vec<u8>) -> Result<(), BridgeError> {
        self.audio_tx
            .send(pcm)
            .await
            .map_err(|_| BridgeError::Closed)
    }

    /// True once the uplink task has stopped accepting audio.
    pub fn is_closed(&self) -> bool {
        self.audio_tx.is_closed()
    }

    /// Shuts the bridge down: drains the uplink, sends the WebSocket close
    /// frame, and stops the receive loop.
    pub async fn close(self) {
        let VoiceBridge {
            audio_tx,
            send_task,
            recv_task,
        } = self;
        drop(audio_tx);
        let _ = send_task.await;
        recv_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn activation_requires_token_and_voice_mode() {
        assert!(should_activate(true, InputMode::Voice));
        assert!(!should_activate(true, InputMode::Text));
        assert!(!should_activate(false, InputMode::Voice));
        assert!(!should_activate(false, InputMode::Text));
    }

    #[test]
    fn parses_known_frames() {
        assert_eq!(
            parse_frame(r#"{"type":"user_transcript","text":"hel","is_final":false}"#),
            Some(BridgeEvent::UserTranscript {
                text: "hel".into(),
                is_final: false,
            })
        );
        assert_eq!(
            parse_frame(r#"{"type":"bot_token","text":"Bon"}"#),
            Some(BridgeEvent::BotToken { text: "Bon".into() })
        );
        assert_eq!(
            parse_frame(r#"{"type":"turn_complete"}"#),
            Some(BridgeEvent::TurnComplete)
        );
        assert_eq!(
            parse_frame(r#"{"type":"turn_interrupted"}"#),
            Some(BridgeEvent::TurnInterrupted)
        );
    }

    #[test]
    fn transcript_finality_defaults_to_partial() {
        assert_eq!(
            parse_frame(r#"{"type":"user_transcript","text":"hi"}"#),
            Some(BridgeEvent::UserTranscript {
                text: "hi".into(),
                is_final: false,
            })
        );
    }

    #[test]
    fn unknown_frames_are_dropped() {
        assert_eq!(parse_frame(r#"{"type":"vu_meter","level":0.3}"#), None);
        assert_eq!(parse_frame("not json"), None);
    }

    #[test]
    fn init_frame_carries_identifiers() {
        let value: serde_json::Value = serde_json::from_str(&init_frame("r1", "alice")).unwrap();
        assert_eq!(value["type"], "init");
        assert_eq!(value["room_id"], "r1");
        assert_eq!(value["speaker_id"], "alice");
    }

    #[tokio::test]
    async fn round_trip_against_local_backend() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let init = match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => text,
                other => panic!("expected init frame, got {other:?}"),
            };
            let init: serde_json::Value = serde_json::from_str(&init).unwrap();
            assert_eq!(init["type"], "init");
            assert_eq!(init["room_id"], "room-1");
            assert_eq!(init["speaker_id"], "alice");

            let audio = match ws.next().await.unwrap().unwrap() {
                Message::Binary(bytes) => bytes,
                other => panic!("expected audio frame, got {other:?}"),
            };
            assert_eq!(&audio[..], &[1, 0, 2, 0]);

            ws.send(Message::Text(r#"{"type":"bot_token","text":"hi"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"turn_complete"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let (tx, mut rx) = mpsc::channel(16);
        let bridge = VoiceBridge::connect(&format!("ws://{addr}"), "room-1", "alice", tx)
            .await
            .unwrap();
        bridge.send_audio(vec![1, 0, 2, 0]).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(BridgeEvent::BotToken { text: "hi".into() })
        );
        assert_eq!(rx.recv().await, Some(BridgeEvent::TurnComplete));
        assert_eq!(rx.recv().await, Some(BridgeEvent::Closed));

        bridge.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let result = VoiceBridge::connect("ws://127.0.0.1:1", "r", "u", tx).await;
        assert!(matches!(result, Err(BridgeError::Connect(_))));
    }
}
