//! Request parameters and response shapes for the classroom REST API.

use serde::{Deserialize, Serialize};

use crate::model::{Message, RoomType};

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

/// Query parameters for `POST /classroom/rooms`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateRoomParams {
    pub name: String,
    pub topic: String,
    /// Identity of the creating teacher; the server rejects non-teachers.
    pub teacher_id: String,
    pub room_type: RoomType,
    /// Optional curriculum node this room teaches from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curriculum_id: Option<String>,
}

/// Body for `PUT /classroom/rooms/{id}`.  Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateRoomParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_topic: Option<String>,
}

/// Floor-control verb for `POST /classroom/rooms/{id}/token`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TokenAction {
    Request,
    Pass { user_id: String },
    Release,
}

// ---------------------------------------------------------------------------
// Teacher-role workflow
// ---------------------------------------------------------------------------

/// Response of `GET /classroom/teacher-status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TeacherStatus {
    pub is_teacher: bool,
    /// Whether this user already has a role-grant request waiting.
    #[serde(default)]
    pub request_pending: bool,
}

/// One entry of `GET /classroom/teacher-requests`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TeacherRequest {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Session history
// ---------------------------------------------------------------------------

/// One entry of `GET /classroom/sessions`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub room_name: String,
    pub lesson_topic: String,
    /// RFC 3339 timestamp as delivered by the backend.
    pub started_at: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub participant_count: u64,
}

/// Full transcript of `GET /classroom/sessions/{id}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionDetail {
    pub id: String,
    pub room_name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// One generated quiz question in a session report.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuizItem {
    pub question: String,
    pub options: Vec<String>,
    pub answer_index: usize,
}

/// AI-generated recap of `GET /classroom/sessions/{id}/summary`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionReport {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub quiz: Vec<QuizItem>,
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

/// Aggregate usage statistics from `GET /classroom/dashboard`.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct DashboardStats {
    #[serde(default)]
    pub active_rooms: u64,
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default)]
    pub total_speaking_seconds: u64,
}

// ---------------------------------------------------------------------------
// Curriculum
// ---------------------------------------------------------------------------

/// One node of the read-only curriculum tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurriculumNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub children: Vec<CurriculumNode>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
