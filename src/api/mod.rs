//! REST API layer for the classroom backend.
//!
//! This module provides:
//! * [`ApiClient`] — JSON-over-HTTP wrapper for the `/classroom/*` endpoints.
//! * [`ApiError`] — error variants with the backend's `detail` text.
//! * Request/response shapes in [`types`].
//!
//! Real-time traffic (room socket, voice bridge) lives in
//! [`crate::session`] and [`crate::bridge`]; this layer covers everything
//! request/response shaped: room CRUD, floor-token actions, the teacher-role
//! workflow, session history with AI summaries, dashboard statistics, and
//! read-only curriculum browsing.

pub mod client;
pub mod types;

pub use client::{ApiClient, ApiError};
pub use types::{
    CreateRoomParams, CurriculumNode, DashboardStats, QuizItem, SessionDetail, SessionReport,
    SessionSummary, TeacherRequest, TeacherStatus, TokenAction, UpdateRoomParams,
};
