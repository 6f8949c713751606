//! Live session: state machine, reducer and controller.
//!
//! * [`ClassroomState`] — all mutable session data behind one lock.
//! * [`ClassroomState::apply`] — the synchronous reducer turning server
//!   events into state changes.
//! * [`SessionController`] — owns the room socket and the background tasks.
//! * [`SessionEvent`] — typed change notifications for the embedder.

pub mod controller;
pub mod state;

pub use controller::{SessionController, SessionError};
pub use state::{ClassroomState, SessionEvent, SessionPhase, StateError};
