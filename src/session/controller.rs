//! Session controller: owns the room socket and drives the state machine.
//!
//! One [`SessionController`] manages at most one live session. `join()`
//! performs the WebSocket handshake inline, then spawns two tasks:
//!
//! * the **engine** — reads the socket, feeds text frames through the
//!   [`ClassroomState`] reducer, routes binary frames to the playback queue,
//!   and manages the voice bridge lifecycle,
//! * the **polling backstop** — a fixed-interval full room snapshot over
//!   REST, applied as a wholesale replace.
//!
//! Every state change is published as a [`SessionEvent`] on the channel the
//! embedder supplied. The controller holds no socket registry of any kind;
//! all routing is through the channels owned by this instance.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::api::ApiClient;
use crate::audio::{AudioSink, PlaybackQueue};
use crate::bridge::{should_activate, BridgeEvent, VoiceBridge};
use crate::config::{ClientConfig, InputMode};
use crate::model::PlaybackMode;
use crate::protocol::{parse_event, ClientCommand, ServerEvent};
use crate::session::state::{ClassroomState, SessionEvent, SessionPhase, StateError};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    /// A command was issued without a live session.
    #[error("session: not connected")]
    NotConnected,
    /// The requested phase change is not legal from the current phase.
    #[error(transparent)]
    Phase(#[from] StateError),
    /// The room socket could not be opened.
    #[error("session: connection failed: {0}")]
    Connect(String),
    /// The socket opened but the join handshake did not complete.
    #[error("session: handshake failed: {0}")]
    Handshake(String),
    /// The server refused the join.
    #[error("session: join rejected: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Engine messages
// ---------------------------------------------------------------------------

/// Controller → engine control channel.
enum EngineMsg {
    /// Serialize and send one command frame on the room socket.
    Command(ClientCommand),
    /// Microphone PCM for the voice bridge uplink.
    Audio(Vec<u8>),
    /// Input preference changed; re-evaluate the bridge.
    SetInputMode(InputMode),
}

const ENGINE_CHANNEL_CAPACITY: usize = 64;
const BRIDGE_EVENT_CAPACITY: usize = 64;

/// A poisoned lock only means some reader panicked mid-inspection; the
/// reducer itself never leaves the state half-applied, so recovering the
/// guard is always sound.
fn lock_state(state: &Arc<Mutex<ClassroomState>>) -> MutexGuard<'_, ClassroomState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn publish(events: &mpsc::Sender<SessionEvent>, batch: Vec<SessionEvent>) {
    for event in batch {
        // A dropped receiver means the embedder went away; nothing to do.
        let _ = events.send(event).await;
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

struct Connection {
    ctrl_tx: mpsc::Sender<EngineMsg>,
    engine: JoinHandle<()>,
    poll: JoinHandle<()>,
}

pub struct SessionController {
    config: ClientConfig,
    api: ApiClient,
    state: Arc<Mutex<ClassroomState>>,
    events: mpsc::Sender<SessionEvent>,
    playback: Arc<PlaybackQueue>,
    input_mode: InputMode,
    conn: Option<Connection>,
}

impl SessionController {
    /// `sink` is the platform audio output; `events` receives every state
    /// change notification for the lifetime of the controller.
    pub fn new(
        config: ClientConfig,
        sink: Arc<dyn AudioSink>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let api = ApiClient::new(config.backend.clone(), config.identity.clone());
        let playback = Arc::new(PlaybackQueue::new(sink));
        playback.set_enabled(config.session.playback_mode == PlaybackMode::TextAndAudio);
        let input_mode = config.session.input_mode;

        Self {
            config,
            api,
            state: Arc::new(Mutex::new(ClassroomState::new())),
            events,
            playback,
            input_mode,
            conn: None,
        }
    }

    /// Shared handle to the session state for synchronous inspection.
    pub fn state(&self) -> Arc<Mutex<ClassroomState>> {
        Arc::clone(&self.state)
    }

    /// Whether a live session is up. The engine exits on its own after a
    /// disconnect or kick, so the handle alone is not proof of a connection.
    pub fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.engine.is_finished())
    }

    // ---- join / leave ---------------------------------------------------

    /// Open the room socket, run the join handshake, and start the session
    /// tasks. Legal only from the lobby.
    pub async fn join(&mut self, room_id: &str) -> Result<(), SessionError> {
        {
            let mut state = lock_state(&self.state);
            state.set_phase(SessionPhase::Joining)?;
        }
        publish(
            &self.events,
            vec![SessionEvent::PhaseChanged(SessionPhase::Joining)],
        )
        .await;

        match self.join_inner(room_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                {
                    let mut state = lock_state(&self.state);
                    // Joining -> Lobby is always legal.
                    let _ = state.set_phase(SessionPhase::Lobby);
                }
                publish(
                    &self.events,
                    vec![SessionEvent::PhaseChanged(SessionPhase::Lobby)],
                )
                .await;
                Err(err)
            }
        }
    }

    async fn join_inner(&mut self, room_id: &str) -> Result<(), SessionError> {
        let url = self.config.backend.room_ws_url(room_id);
        log::info!("session: joining room {room_id} via {url}");

        let (stream, _) = connect_async(&url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = stream.split();

        let join = ClientCommand::Join {
            user_id: self.config.identity.user_id.clone(),
            name: self.config.identity.display_name.clone(),
            language: self.config.identity.language.clone(),
            token: self.config.backend.token.clone(),
        };
        let frame = serde_json::to_string(&join)
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        ws_tx
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;

        // Wait for the acknowledgment before anything else is processed.
        let batch = loop {
            match ws_rx.next().await {
                Some(Ok(WsMessage::Text(text))) => match parse_event(&text) {
                    Ok(joined @ ServerEvent::Joined { .. }) => {
                        let mut state = lock_state(&self.state);
                        break state.apply(joined);
                    }
                    Ok(ServerEvent::Error { detail }) => {
                        return Err(SessionError::Rejected(
                            detail.unwrap_or_else(|| "no reason given".into()),
                        ));
                    }
                    Ok(other) => {
                        log::debug!("session: ignoring pre-join event {other:?}");
                    }
                    Err(err) => {
                        log::warn!("session: undecodable frame during handshake: {err}");
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(SessionError::Handshake(
                        "socket closed before joined acknowledgment".into(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(SessionError::Handshake(err.to_string())),
            }
        };
        publish(&self.events, batch).await;
        log::info!("session: joined room {room_id}");

        let (ctrl_tx, ctrl_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
        let (bridge_tx, bridge_rx) = mpsc::channel(BRIDGE_EVENT_CAPACITY);

        let poll = tokio::spawn(poll_loop(
            self.api.clone(),
            room_id.to_string(),
            self.config.session.poll_interval_secs,
            Arc::clone(&self.state),
            self.events.clone(),
        ));

        let engine = Engine {
            ws_tx,
            ws_rx,
            ctrl_rx,
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            playback: Arc::clone(&self.playback),
            bridge_url: self.config.backend.bridge_url.clone(),
            input_mode: self.input_mode,
            bridge: None,
            bridge_tx,
            bridge_rx,
            poll_abort: poll.abort_handle(),
        };
        let engine = tokio::spawn(engine.run());

        self.conn = Some(Connection {
            ctrl_tx,
            engine,
            poll,
        });
        Ok(())
    }

    /// Deterministic teardown: after this returns no session task runs, the
    /// audio queue is empty, and the state is back to a pristine lobby.
    pub async fn leave(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.engine.abort();
            conn.poll.abort();
        }
        self.playback.flush();
        {
            let mut state = lock_state(&self.state);
            state.reset();
        }
        publish(
            &self.events,
            vec![SessionEvent::PhaseChanged(SessionPhase::Lobby)],
        )
        .await;
        log::info!("session: left room");
    }

    // ---- lobby side screens ---------------------------------------------

    pub async fn open_history(&mut self) -> Result<(), SessionError> {
        self.navigate(SessionPhase::History).await
    }

    pub async fn open_dashboard(&mut self) -> Result<(), SessionError> {
        self.navigate(SessionPhase::Dashboard).await
    }

    pub async fn open_settings(&mut self) -> Result<(), SessionError> {
        self.navigate(SessionPhase::Settings).await
    }

    pub async fn back_to_lobby(&mut self) -> Result<(), SessionError> {
        self.navigate(SessionPhase::Lobby).await
    }

    async fn navigate(&mut self, to: SessionPhase) -> Result<(), SessionError> {
        {
            let mut state = lock_state(&self.state);
            state.set_phase(to)?;
        }
        publish(&self.events, vec![SessionEvent::PhaseChanged(to)]).await;
        Ok(())
    }

    // ---- commands -------------------------------------------------------

    async fn send_command(&self, command: ClientCommand) -> Result<(), SessionError> {
        let conn = self.conn.as_ref().ok_or(SessionError::NotConnected)?;
        conn.ctrl_tx
            .send(EngineMsg::Command(command))
            .await
            .map_err(|_| SessionError::NotConnected)
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send_command(ClientCommand::TextMessage { text: text.into() })
            .await
    }

    pub async fn request_token(&self) -> Result<(), SessionError> {
        self.send_command(ClientCommand::RequestToken).await
    }

    pub async fn release_token(&self) -> Result<(), SessionError> {
        self.send_command(ClientCommand::ReleaseToken).await
    }

    pub async fn pass_token(&self, user_id: impl Into<String>) -> Result<(), SessionError> {
        self.send_command(ClientCommand::PassToken {
            user_id: user_id.into(),
        })
        .await
    }

    /// Ask for the floor. A second raise while one is already pending for
    /// this user is a local no-op.
    pub async fn raise_hand(&self, preview: Option<String>) -> Result<(), SessionError> {
        {
            let state = lock_state(&self.state);
            if let Some(id) = state.self_id() {
                if state.room.pending_hand(id).is_some() {
                    log::debug!("session: hand already pending, not raising again");
                    return Ok(());
                }
            }
        }
        self.send_command(ClientCommand::HandRaise { preview }).await
    }

    pub async fn lower_hand(&self) -> Result<(), SessionError> {
        self.send_command(ClientCommand::HandLower).await
    }

    pub async fn acknowledge_hand(&self, id: impl Into<String>) -> Result<(), SessionError> {
        self.send_command(ClientCommand::HandAcknowledge { id: id.into() })
            .await
    }

    pub async fn dismiss_hand(&self, id: impl Into<String>) -> Result<(), SessionError> {
        self.send_command(ClientCommand::HandDismiss { id: id.into() })
            .await
    }

    pub async fn react(
        &self,
        message_id: impl Into<String>,
        emoji: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.send_command(ClientCommand::Reaction {
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
        .await
    }

    pub async fn teacher_action(
        &self,
        action: impl Into<String>,
        target: Option<String>,
    ) -> Result<(), SessionError> {
        self.send_command(ClientCommand::TeacherAction {
            action: action.into(),
            target,
        })
        .await
    }

    pub async fn request_topics(&self) -> Result<(), SessionError> {
        self.send_command(ClientCommand::RequestTopics).await
    }

    /// Change the playback preference. The command goes to the server first
    /// so a failed send leaves the local preference untouched; on success the
    /// queue reacts before this returns — an opt-out must not let
    /// already-buffered audio keep playing.
    pub async fn set_playback_mode(&self, mode: PlaybackMode) -> Result<(), SessionError> {
        self.send_command(ClientCommand::SetMode { mode }).await?;
        self.playback
            .set_enabled(mode == PlaybackMode::TextAndAudio);
        Ok(())
    }

    /// Switch between typed and voice input. Takes effect on the next
    /// bridge re-evaluation (token changes included).
    pub async fn set_input_mode(&mut self, mode: InputMode) -> Result<(), SessionError> {
        self.input_mode = mode;
        let conn = self.conn.as_ref().ok_or(SessionError::NotConnected)?;
        conn.ctrl_tx
            .send(EngineMsg::SetInputMode(mode))
            .await
            .map_err(|_| SessionError::NotConnected)
    }

    /// Forward one microphone PCM chunk to the voice bridge. Dropped
    /// silently when no bridge is up.
    pub async fn send_audio(&self, pcm: Vec<u8>) -> Result<(), SessionError> {
        let conn = self.conn.as_ref().ok_or(SessionError::NotConnected)?;
        conn.ctrl_tx
            .send(EngineMsg::Audio(pcm))
            .await
            .map_err(|_| SessionError::NotConnected)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.engine.abort();
            conn.poll.abort();
        }
        self.playback.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Polling backstop
// ---------------------------------------------------------------------------

/// Fixed-interval full room snapshot over REST. Overlap cannot happen: the
/// next tick is not awaited until the previous request finished.
async fn poll_loop(
    api: ApiClient,
    room_id: String,
    interval_secs: u64,
    state: Arc<Mutex<ClassroomState>>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // the immediate first tick

    loop {
        interval.tick().await;
        match api.get_room(&room_id).await {
            Ok(room) => {
                let batch = {
                    let mut state = lock_state(&state);
                    state.replace_room(room)
                };
                publish(&events, batch).await;
            }
            Err(err) => {
                // The socket remains the primary channel; a failed poll is
                // only worth a debug line.
                log::debug!("session: room poll failed: {err}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Engine {
    ws_tx: WsSink,
    ws_rx: WsSource,
    ctrl_rx: mpsc::Receiver<EngineMsg>,
    state: Arc<Mutex<ClassroomState>>,
    events: mpsc::Sender<SessionEvent>,
    playback: Arc<PlaybackQueue>,
    bridge_url: String,
    input_mode: InputMode,
    bridge: Option<VoiceBridge>,
    bridge_tx: mpsc::Sender<BridgeEvent>,
    bridge_rx: mpsc::Receiver<BridgeEvent>,
    poll_abort: AbortHandle,
}

/// Why the engine loop ended.
enum Exit {
    /// Clean disconnect or kick: back to the lobby.
    ToLobby { kicked: bool },
    /// Socket failure: surface the error phase.
    ToError,
}

impl Engine {
    async fn run(mut self) {
        // The joined snapshot may already name this user as the speaker.
        self.reconcile_bridge().await;

        let exit = self.event_loop().await;

        self.poll_abort.abort();
        if let Some(bridge) = self.bridge.take() {
            bridge.close().await;
        }
        self.playback.flush();

        match exit {
            Exit::ToLobby { kicked } => {
                {
                    let mut state = lock_state(&self.state);
                    state.reset();
                }
                let mut batch = vec![SessionEvent::PhaseChanged(SessionPhase::Lobby)];
                if !kicked {
                    batch.push(SessionEvent::Disconnected);
                }
                publish(&self.events, batch).await;
            }
            Exit::ToError => {
                {
                    let mut state = lock_state(&self.state);
                    let _ = state.set_phase(SessionPhase::Error);
                }
                publish(
                    &self.events,
                    vec![
                        SessionEvent::PhaseChanged(SessionPhase::Error),
                        SessionEvent::Disconnected,
                    ],
                )
                .await;
            }
        }
    }

    async fn event_loop(&mut self) -> Exit {
        loop {
            tokio::select! {
                frame = self.ws_rx.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(exit) = self.on_text_frame(&text).await {
                                return exit;
                            }
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            self.playback.push(bytes.to_vec());
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            log::info!("session: room socket closed");
                            return Exit::ToLobby { kicked: false };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            log::error!("session: room socket error: {err}");
                            return Exit::ToError;
                        }
                    }
                }
                Some(msg) = self.ctrl_rx.recv() => {
                    self.on_ctrl(msg).await;
                }
                Some(bridge_event) = self.bridge_rx.recv() => {
                    self.on_bridge_event(bridge_event).await;
                }
            }
        }
    }

    /// Apply one inbound event. Returns an exit reason when the event ends
    /// the session.
    async fn on_text_frame(&mut self, text: &str) -> Option<Exit> {
        let event = match parse_event(text) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("session: dropping undecodable frame: {err}");
                return None;
            }
        };
        if let ServerEvent::Unknown { ref kind } = event {
            log::debug!("session: ignoring unknown event type '{kind}'");
            return None;
        }

        let batch = {
            let mut state = lock_state(&self.state);
            state.apply(event)
        };
        let kicked = batch
            .iter()
            .any(|e| matches!(e, SessionEvent::Kicked { .. }));
        self.sync_playback_preference(&batch);
        publish(&self.events, batch).await;

        if kicked {
            log::warn!("session: removed from room by teacher");
            return Some(Exit::ToLobby { kicked: true });
        }

        self.reconcile_bridge().await;
        None
    }

    /// Mirror the local user's authoritative playback mode onto the queue.
    fn sync_playback_preference(&self, batch: &[SessionEvent]) {
        let self_id = {
            let state = lock_state(&self.state);
            state.self_id().map(str::to_string)
        };
        let Some(self_id) = self_id else { return };
        for event in batch {
            if let SessionEvent::PlaybackModeChanged { user_id, mode } = event {
                if *user_id == self_id {
                    self.playback
                        .set_enabled(*mode == PlaybackMode::TextAndAudio);
                }
            }
        }
    }

    async fn on_ctrl(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Command(command) => match serde_json::to_string(&command) {
                Ok(json) => {
                    if let Err(err) = self.ws_tx.send(WsMessage::Text(json.into())).await {
                        log::warn!("session: command send failed: {err}");
                    }
                }
                Err(err) => log::warn!("session: command encode failed: {err}"),
            },
            EngineMsg::Audio(pcm) => {
                if let Some(bridge) = &self.bridge {
                    if bridge.send_audio(pcm).await.is_err() {
                        log::warn!("session: bridge uplink gone, dropping audio");
                        self.drop_bridge().await;
                    }
                }
                // Without a bridge, microphone data is silently discarded.
            }
            EngineMsg::SetInputMode(mode) => {
                self.input_mode = mode;
                self.reconcile_bridge().await;
            }
        }
    }

    /// Translate bridge traffic into the same reducer events the room socket
    /// produces, so streamed turns follow one code path.
    async fn on_bridge_event(&mut self, event: BridgeEvent) {
        let mapped = match event {
            BridgeEvent::UserTranscript { text, is_final } => {
                let user_id = {
                    let state = lock_state(&self.state);
                    state.self_id().map(str::to_string)
                };
                let Some(user_id) = user_id else { return };
                if is_final {
                    // Relay the final transcript so the server can broadcast
                    // it to the listeners.
                    self.on_ctrl(EngineMsg::Command(ClientCommand::SpeakerTranscript {
                        text: text.clone(),
                        is_final: true,
                    }))
                    .await;
                }
                ServerEvent::Transcription {
                    user_id,
                    text,
                    is_final,
                }
            }
            BridgeEvent::BotToken { text } => ServerEvent::BotText { text },
            BridgeEvent::TurnComplete => ServerEvent::BotTextComplete,
            BridgeEvent::TurnInterrupted => ServerEvent::BotResponseInterrupted,
            BridgeEvent::Closed => {
                log::warn!("session: voice bridge closed, typed input still available");
                self.bridge = None;
                return;
            }
        };

        let batch = {
            let mut state = lock_state(&self.state);
            state.apply(mapped)
        };
        publish(&self.events, batch).await;
    }

    /// Bring the bridge up or down to match `is_speaker && voice input`.
    async fn reconcile_bridge(&mut self) {
        let (want, room_id, speaker_id) = {
            let state = lock_state(&self.state);
            (
                should_activate(state.is_self_speaker(), self.input_mode),
                state.room.id.clone(),
                state.self_id().map(str::to_string),
            )
        };

        if want && self.bridge.is_none() {
            let Some(speaker_id) = speaker_id else { return };
            match VoiceBridge::connect(
                &self.bridge_url,
                &room_id,
                &speaker_id,
                self.bridge_tx.clone(),
            )
            .await
            {
                Ok(bridge) => {
                    log::info!("session: voice bridge up");
                    self.bridge = Some(bridge);
                }
                Err(err) => {
                    // The session continues on typed input.
                    log::warn!("session: voice bridge unavailable: {err}");
                }
            }
        } else if !want {
            self.drop_bridge().await;
        }
    }

    async fn drop_bridge(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.close().await;
            log::info!("session: voice bridge down");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioError;
    use crate::config::{BackendConfig, IdentityConfig};
    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use std::sync::Mutex as StdMutex;
    use tokio_tungstenite::tungstenite::Message;

    struct RecordingSink {
        played: StdMutex<Vec<Vec<i16>>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                played: StdMutex::new(Vec::new()),
            })
        }

        fn played(&self) -> Vec<Vec<i16>> {
            self.played.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&self, samples: &[i16]) -> Result<(), AudioError> {
            self.played.lock().unwrap().push(samples.to_vec());
            Ok(())
        }

        async fn resume(&self) -> Result<(), AudioError> {
            Ok(())
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn test_config(ws_port: u16) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.backend = BackendConfig {
            base_url: format!("http://127.0.0.1:{ws_port}"),
            bridge_url: "ws://127.0.0.1:1".into(),
            token: Some("bearer-test".into()),
        };
        config.identity = IdentityConfig {
            user_id: "me".into(),
            display_name: "Asha".into(),
            language: "sw".into(),
        };
        // Keep the polling backstop out of the way.
        config.session.poll_interval_secs = 3600;
        config
    }

    fn joined_frame() -> String {
        serde_json::json!({
            "type": "joined",
            "user": {"id": "me", "name": "Asha", "language": "sw"},
            "room": {
                "id": "r1",
                "name": "Algebra",
                "users": [{"id": "me", "name": "Asha", "language": "sw"}],
            },
        })
        .to_string()
    }

    /// Accept one client, answer its join, then hand the socket over.
    async fn accept_and_join(
        listener: tokio::net::TcpListener,
    ) -> WebSocketStream<tokio::net::TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let join = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => text,
            other => panic!("expected join frame, got {other:?}"),
        };
        let join: serde_json::Value = serde_json::from_str(&join).unwrap();
        assert_eq!(join["type"], "join");
        assert_eq!(join["user_id"], "me");
        assert_eq!(join["token"], "bearer-test");

        ws.send(Message::Text(joined_frame().into())).await.unwrap();
        ws
    }

    async fn expect_command(
        ws: &mut WebSocketStream<tokio::net::TcpStream>,
        expected_type: &str,
    ) -> serde_json::Value {
        let frame = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => text,
            other => panic!("expected command frame, got {other:?}"),
        };
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], expected_type);
        value
    }

    #[tokio::test]
    async fn commands_before_join_are_rejected() {
        let (tx, _rx) = mpsc::channel(16);
        let controller = SessionController::new(test_config(1), RecordingSink::new(), tx);
        assert!(matches!(
            controller.request_token().await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn playback_preference_unchanged_when_send_fails() {
        let (tx, _rx) = mpsc::channel(16);
        let controller = SessionController::new(test_config(1), RecordingSink::new(), tx);
        assert!(controller.playback.is_enabled());

        let err = controller
            .set_playback_mode(PlaybackMode::TextOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
        // The local queue must not diverge from what the server believes.
        assert!(controller.playback.is_enabled());
    }

    #[tokio::test]
    async fn join_refused_outside_lobby() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut controller = SessionController::new(test_config(1), RecordingSink::new(), tx);
        controller.open_settings().await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::PhaseChanged(SessionPhase::Settings))
        );

        let err = controller.join("r1").await.unwrap_err();
        assert!(matches!(err, SessionError::Phase(_)));
    }

    #[tokio::test]
    async fn join_connect_failure_returns_to_lobby() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut controller = SessionController::new(test_config(1), RecordingSink::new(), tx);

        let err = controller.join("r1").await.unwrap_err();
        assert!(matches!(err, SessionError::Connect(_)));
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::PhaseChanged(SessionPhase::Joining))
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::PhaseChanged(SessionPhase::Lobby))
        );
        let state = controller.state();
        assert_eq!(lock_state(&state).phase(), SessionPhase::Lobby);
    }

    #[tokio::test]
    async fn join_handshake_token_flow_and_kick() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut ws = accept_and_join(listener).await;

            expect_command(&mut ws, "request_token").await;
            ws.send(Message::Text(
                r#"{"type":"token_changed","speaker_id":"me","queue":[]}"#.into(),
            ))
            .await
            .unwrap();

            ws.send(Message::Text(
                r#"{"type":"kicked","reason":"test over"}"#.into(),
            ))
            .await
            .unwrap();
            // Keep the socket open; the client tears down on the event.
            let _ = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
        });

        let (tx, mut rx) = mpsc::channel(64);
        let sink = RecordingSink::new();
        let mut controller =
            SessionController::new(test_config(port), sink.clone() as Arc<dyn AudioSink>, tx);

        controller.join("r1").await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::PhaseChanged(SessionPhase::Joining))
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::PhaseChanged(SessionPhase::Active))
        );
        assert_eq!(rx.recv().await, Some(SessionEvent::RoomUpdated));

        controller.request_token().await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::TokenChanged {
                speaker_id: Some("me".into())
            })
        );
        {
            let state = controller.state();
            let state = lock_state(&state);
            assert!(state.is_self_speaker());
        }

        // The kick behaves exactly like leave(): reset state, lobby phase.
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Kicked {
                reason: Some("test over".into())
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::PhaseChanged(SessionPhase::Lobby))
        );
        {
            let state = controller.state();
            let state = lock_state(&state);
            assert_eq!(state.phase(), SessionPhase::Lobby);
            assert!(state.self_user.is_none());
        }
        // The engine exited on the kick; no live connection may be reported
        // even though leave() was never called.
        wait_until(|| !controller.is_connected()).await;

        server.await.unwrap();
    }

    #[tokio::test]
    async fn binary_frames_reach_the_audio_sink() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut ws = accept_and_join(listener).await;
            // 2 samples of PCM: 1, -2.
            ws.send(Message::Binary(vec![1, 0, 0xFE, 0xFF].into()))
                .await
                .unwrap();
            let _ = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
        });

        let (tx, _rx) = mpsc::channel(64);
        let sink = RecordingSink::new();
        let mut controller =
            SessionController::new(test_config(port), sink.clone() as Arc<dyn AudioSink>, tx);
        controller.join("r1").await.unwrap();

        let probe = Arc::clone(&sink);
        wait_until(move || !probe.played().is_empty()).await;
        assert_eq!(sink.played()[0], vec![1, -2]);

        controller.leave().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_hand_raise_is_suppressed_locally() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut ws = accept_and_join(listener).await;

            let raise = expect_command(&mut ws, "hand_raise").await;
            assert_eq!(raise["preview"], "why?");
            ws.send(Message::Text(
                r#"{"type":"hand_raised","hand":{"id":"h1","user_id":"me","status":"pending"}}"#
                    .into(),
            ))
            .await
            .unwrap();

            // The duplicate raise never arrives; the next frame must be the
            // topics request sent afterwards.
            expect_command(&mut ws, "request_topics").await;
        });

        let (tx, mut rx) = mpsc::channel(64);
        let mut controller =
            SessionController::new(test_config(port), RecordingSink::new(), tx);
        controller.join("r1").await.unwrap();

        controller.raise_hand(Some("why?".into())).await.unwrap();
        wait_until({
            let state = controller.state();
            move || lock_state(&state).room.pending_hand("me").is_some()
        })
        .await;

        controller.raise_hand(Some("again".into())).await.unwrap();
        controller.request_topics().await.unwrap();

        server.await.unwrap();
        // Drain so the channel does not backpressure the engine.
        while rx.try_recv().is_ok() {}
        controller.leave().await;
    }

    #[tokio::test]
    async fn leave_is_deterministic() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut ws = accept_and_join(listener).await;
            let _ = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
        });

        let (tx, mut rx) = mpsc::channel(64);
        let mut controller =
            SessionController::new(test_config(port), RecordingSink::new(), tx);
        controller.join("r1").await.unwrap();
        controller.leave().await;

        assert!(!controller.is_connected());
        {
            let state = controller.state();
            let state = lock_state(&state);
            assert_eq!(state.phase(), SessionPhase::Lobby);
            assert!(state.messages.is_empty());
        }
        assert!(matches!(
            controller.send_text("hello").await,
            Err(SessionError::NotConnected)
        ));

        // The published trail ends in the lobby.
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(SessionEvent::PhaseChanged(SessionPhase::Lobby)));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_while_active_lands_in_lobby() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut ws = accept_and_join(listener).await;
            ws.close(None).await.unwrap();
        });

        let (tx, mut rx) = mpsc::channel(64);
        let mut controller =
            SessionController::new(test_config(port), RecordingSink::new(), tx);
        controller.join("r1").await.unwrap();
        server.await.unwrap();

        // Skip the join trail, then expect lobby + disconnect notice.
        let mut saw_disconnect = false;
        let mut saw_lobby = false;
        for _ in 0..8 {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(SessionEvent::Disconnected)) => saw_disconnect = true,
                Ok(Some(SessionEvent::PhaseChanged(SessionPhase::Lobby))) => saw_lobby = true,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
            if saw_disconnect && saw_lobby {
                break;
            }
        }
        assert!(saw_lobby, "no lobby phase after disconnect");
        assert!(saw_disconnect, "no disconnect notification");
    }
}
