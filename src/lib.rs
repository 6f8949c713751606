//! Client library for Pipecat-based voice classrooms.
//!
//! Connects to a classroom backend and drives one live session at a time:
//! real-time room state over WebSocket, floor control with a single speaker
//! token, a hand-raise queue, streamed assistant answers, PCM audio playback
//! for listeners, and a voice bridge for the active speaker.
//!
//! # Layers
//!
//! * [`model`] — domain types shared by every layer.
//! * [`protocol`] — the WebSocket wire protocol (commands out, events in).
//! * [`session`] — state machine, reducer and the [`SessionController`].
//! * [`bridge`] — the speaker's voice connection.
//! * [`audio`] — listener-side PCM playback queue.
//! * [`api`] — request/response REST surface (rooms, history, dashboard).
//! * [`config`] — TOML settings persisted per platform.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use classroom_client::audio::{AudioError, AudioSink};
//! use classroom_client::config::ClientConfig;
//! use classroom_client::session::SessionController;
//!
//! struct NullSink;
//!
//! #[async_trait::async_trait]
//! impl AudioSink for NullSink {
//!     async fn play(&self, _samples: &[i16]) -> Result<(), AudioError> { Ok(()) }
//!     async fn resume(&self) -> Result<(), AudioError> { Ok(()) }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ClientConfig::load()?;
//! let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(64);
//! let mut session = SessionController::new(config, Arc::new(NullSink), events_tx);
//!
//! session.join("room-1").await?;
//! session.send_text("hello everyone").await?;
//! while let Some(event) = events_rx.recv().await {
//!     // render state changes
//!     let _ = event;
//! }
//! session.leave().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod model;
pub mod protocol;
pub mod session;

pub use session::{SessionController, SessionEvent, SessionPhase};
