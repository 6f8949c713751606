//! Listener-side audio playback.
//!
//! # Pipeline
//!
//! ```text
//! room socket binary frame → PlaybackQueue (FIFO) → decode_pcm → AudioSink
//! ```
//!
//! The crate ships no audio device code of its own: [`AudioSink`] is the
//! seam where the embedding application plugs in its platform audio stack
//! (Web Audio, cpal, a test recorder, …).

pub mod playback;

pub use playback::{decode_pcm, AudioError, AudioSink, PlaybackQueue};
