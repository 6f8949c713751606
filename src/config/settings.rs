//! Client settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::model::PlaybackMode;

use super::AppPaths;

// ---------------------------------------------------------------------------
// InputMode
// ---------------------------------------------------------------------------

/// How the local user produces input while holding the speaker token.
///
/// The voice bridge is activated exactly when the local user is the speaker
/// **and** this is [`InputMode::Voice`]; typed input always works as a
/// fallback regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Typed messages only.
    Text,
    /// Microphone streaming via the voice bridge.
    Voice,
}

impl Default for InputMode {
    fn default() -> Self {
        Self::Text
    }
}

// ---------------------------------------------------------------------------
// BackendConfig
// ---------------------------------------------------------------------------

/// Connection details for the classroom/voice backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the REST API (e.g. `https://pipecat.example.net:7860`).
    /// The room WebSocket URL is derived from this via
    /// [`BackendConfig::room_ws_url`].
    pub base_url: String,
    /// Base URL of the voice-bridge WebSocket endpoint.
    pub bridge_url: String,
    /// Bearer token attached to privileged REST calls and the WS `join`
    /// handshake.  `None` for backends running without auth.
    pub token: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7860".into(),
            bridge_url: "ws://localhost:7860/ws".into(),
            token: None,
        }
    }
}

impl BackendConfig {
    /// WebSocket URL for a room, derived from `base_url` by swapping the
    /// scheme (`http` → `ws`, `https` → `wss`).
    pub fn room_ws_url(&self, room_id: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!(
            "{}/classroom/rooms/{room_id}/ws",
            ws_base.trim_end_matches('/')
        )
    }
}

// ---------------------------------------------------------------------------
// IdentityConfig
// ---------------------------------------------------------------------------

/// Display identity sent with the `join` handshake and as supplementary
/// (unverified) headers on REST calls.  The server may override the name and
/// language with persisted profile data for returning users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Stable client-chosen user id.
    pub user_id: String,
    pub display_name: String,
    /// Preferred language as an ISO-639-1 code.
    pub language: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            display_name: "Guest".into(),
            language: "en".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Session-controller behaviour knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Fixed interval, in seconds, of the room-snapshot polling backstop.
    pub poll_interval_secs: u64,
    /// Default playback preference for new sessions.
    pub playback_mode: PlaybackMode,
    /// Default input mode while holding the speaker token.
    pub input_mode: InputMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            playback_mode: PlaybackMode::default(),
            input_mode: InputMode::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level client configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use classroom_client::config::ClientConfig;
///
/// // Load (returns Default when file is missing)
/// let config = ClientConfig::load().unwrap();
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    pub backend: BackendConfig,
    pub identity: IdentityConfig,
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(ClientConfig::default())` when the file does not exist yet
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = ClientConfig::default();
        original.save_to(&path).expect("save");
        let loaded = ClientConfig::load_from(&path).expect("load");

        assert_eq!(original, loaded);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = ClientConfig::load_from(&path).expect("should not error");
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = ClientConfig::default();
        cfg.backend.base_url = "https://pipecat.example.net:7860".into();
        cfg.backend.token = Some("bearer-abc".into());
        cfg.identity.display_name = "Asha".into();
        cfg.identity.language = "sw".into();
        cfg.session.poll_interval_secs = 10;
        cfg.session.playback_mode = PlaybackMode::TextOnly;
        cfg.session.input_mode = InputMode::Voice;

        cfg.save_to(&path).expect("save");
        let loaded = ClientConfig::load_from(&path).expect("load");

        assert_eq!(loaded, cfg);
    }

    // ---- room_ws_url derivation ---

    #[test]
    fn ws_url_from_http_base() {
        let backend = BackendConfig {
            base_url: "http://localhost:7860".into(),
            ..BackendConfig::default()
        };
        assert_eq!(
            backend.room_ws_url("r1"),
            "ws://localhost:7860/classroom/rooms/r1/ws"
        );
    }

    #[test]
    fn ws_url_from_https_base() {
        let backend = BackendConfig {
            base_url: "https://pipecat.example.net:7860/".into(),
            ..BackendConfig::default()
        };
        assert_eq!(
            backend.room_ws_url("abc"),
            "wss://pipecat.example.net:7860/classroom/rooms/abc/ws"
        );
    }

    #[test]
    fn default_input_mode_is_text() {
        assert_eq!(InputMode::default(), InputMode::Text);
    }
}
