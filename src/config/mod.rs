//! Configuration module for the classroom client.
//!
//! Provides `ClientConfig` (top-level settings), sub-configs for each
//! subsystem, `AppPaths` for cross-platform data directories, and TOML
//! persistence via `ClientConfig::load` / `ClientConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{BackendConfig, ClientConfig, IdentityConfig, InputMode, SessionConfig};
