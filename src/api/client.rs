//! REST client for the classroom backend.
//!
//! `ApiClient` wraps a shared `reqwest::Client` and speaks JSON over HTTP to
//! the endpoints under `/classroom/*`.  Every call attaches the bearer token
//! (when configured) plus supplementary display-identity headers; the server
//! treats the latter as unverified hints only.
//!
//! Backend error bodies are expected to carry a human-readable `detail`
//! field.  When one is missing, [`ApiError::Status`] falls back to a generic
//! message so callers always have something displayable.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{BackendConfig, IdentityConfig};
use crate::model::Room;

use super::types::{
    CreateRoomParams, CurriculumNode, DashboardStats, SessionDetail, SessionReport,
    SessionSummary, TeacherRequest, TeacherStatus, TokenAction, UpdateRoomParams,
};

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the REST backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the client timeout.
    #[error("backend request timed out")]
    Timeout,

    /// The backend answered with a non-success status.  `detail` is the
    /// server's `detail` field, or a generic fallback when absent.
    #[error("{detail} (HTTP {status})")]
    Status { status: u16, detail: String },

    /// The response body could not be parsed as the expected JSON shape.
    #[error("failed to parse backend response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Request(e.to_string())
        }
    }
}

/// Shape of a backend error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Thin JSON-over-HTTP wrapper for the classroom endpoints.
///
/// Cheap to clone (shares the underlying connection pool).
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    backend: BackendConfig,
    identity: IdentityConfig,
}

impl ApiClient {
    /// Per-request timeout.  REST calls are snapshots and moderation verbs,
    /// never long-poll streams, so a short timeout is safe.
    const TIMEOUT_SECS: u64 = 15;

    /// Build a client from backend and identity config.
    pub fn new(backend: BackendConfig, identity: IdentityConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(Self::TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            backend,
            identity,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.backend.base_url.trim_end_matches('/'))
    }

    /// Attach auth + display-identity headers common to every call.
    fn decorate(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut req = req
            .header("X-Display-Name", self.identity.display_name.as_str())
            .header("X-Language", self.identity.language.as_str());

        // Attach Authorization header only when a non-empty token exists.
        let token = self.backend.token.as_deref().unwrap_or("");
        if !token.is_empty() {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Send, surface non-success statuses as [`ApiError::Status`], decode.
    async fn execute<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.decorate(req).send().await?;
        let status = response.status();

        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.detail)
                .unwrap_or_else(|| "request rejected by backend".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Like [`execute`](Self::execute) for endpoints with no response body.
    async fn execute_unit(&self, req: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let response = self.decorate(req).send().await?;
        let status = response.status();

        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.detail)
                .unwrap_or_else(|| "request rejected by backend".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    /// `POST /classroom/rooms` — teacher-only.
    pub async fn create_room(&self, params: &CreateRoomParams) -> Result<Room, ApiError> {
        self.execute(self.http.post(self.url("/classroom/rooms")).query(params))
            .await
    }

    /// `GET /classroom/rooms`
    pub async fn list_rooms(&self) -> Result<Vec<Room>, ApiError> {
        self.execute(self.http.get(self.url("/classroom/rooms"))).await
    }

    /// `GET /classroom/rooms/{id}` — full snapshot, used by the polling
    /// backstop as well as the lobby view.
    pub async fn get_room(&self, room_id: &str) -> Result<Room, ApiError> {
        self.execute(self.http.get(self.url(&format!("/classroom/rooms/{room_id}"))))
            .await
    }

    /// `PUT /classroom/rooms/{id}`
    pub async fn update_room(
        &self,
        room_id: &str,
        params: &UpdateRoomParams,
    ) -> Result<Room, ApiError> {
        self.execute(
            self.http
                .put(self.url(&format!("/classroom/rooms/{room_id}")))
                .json(params),
        )
        .await
    }

    /// `DELETE /classroom/rooms/{id}` — teacher/admin only.
    pub async fn delete_room(&self, room_id: &str) -> Result<(), ApiError> {
        self.execute_unit(self.http.delete(self.url(&format!("/classroom/rooms/{room_id}"))))
            .await
    }

    /// `POST /classroom/rooms/{id}/token` — floor-control action over REST
    /// (mirror of the WS commands, usable before a socket is up).
    pub async fn token_action(&self, room_id: &str, action: &TokenAction) -> Result<(), ApiError> {
        self.execute_unit(
            self.http
                .post(self.url(&format!("/classroom/rooms/{room_id}/token")))
                .json(action),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Teacher-role workflow
    // -----------------------------------------------------------------------

    /// `GET /classroom/teacher-status`
    pub async fn teacher_status(&self) -> Result<TeacherStatus, ApiError> {
        self.execute(self.http.get(self.url("/classroom/teacher-status")))
            .await
    }

    /// `POST /classroom/teacher-requests`
    pub async fn submit_teacher_request(&self, reason: Option<&str>) -> Result<(), ApiError> {
        let body = serde_json::json!({ "reason": reason });
        self.execute_unit(
            self.http
                .post(self.url("/classroom/teacher-requests"))
                .json(&body),
        )
        .await
    }

    /// `GET /classroom/teacher-requests` — admin only.
    pub async fn list_teacher_requests(&self) -> Result<Vec<TeacherRequest>, ApiError> {
        self.execute(self.http.get(self.url("/classroom/teacher-requests")))
            .await
    }

    /// `POST /classroom/teacher-requests/{id}/approve` — admin only.
    pub async fn approve_teacher_request(&self, request_id: &str) -> Result<(), ApiError> {
        self.execute_unit(
            self.http
                .post(self.url(&format!("/classroom/teacher-requests/{request_id}/approve"))),
        )
        .await
    }

    /// `POST /classroom/teacher-requests/{id}/reject` — admin only.
    pub async fn reject_teacher_request(&self, request_id: &str) -> Result<(), ApiError> {
        self.execute_unit(
            self.http
                .post(self.url(&format!("/classroom/teacher-requests/{request_id}/reject"))),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Session history
    // -----------------------------------------------------------------------

    /// `GET /classroom/sessions`
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        self.execute(self.http.get(self.url("/classroom/sessions"))).await
    }

    /// `GET /classroom/sessions/{id}`
    pub async fn get_session(&self, session_id: &str) -> Result<SessionDetail, ApiError> {
        self.execute(self.http.get(self.url(&format!("/classroom/sessions/{session_id}"))))
            .await
    }

    /// `GET /classroom/sessions/{id}/summary` — AI-generated recap + quiz.
    pub async fn get_session_summary(&self, session_id: &str) -> Result<SessionReport, ApiError> {
        self.execute(
            self.http
                .get(self.url(&format!("/classroom/sessions/{session_id}/summary"))),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Dashboard
    // -----------------------------------------------------------------------

    /// `GET /classroom/dashboard`
    pub async fn dashboard(&self) -> Result<DashboardStats, ApiError> {
        self.execute(self.http.get(self.url("/classroom/dashboard"))).await
    }

    // -----------------------------------------------------------------------
    // Curriculum (optional subsystem)
    // -----------------------------------------------------------------------

    /// `GET /classroom/curriculum`
    pub async fn curriculum_tree(&self) -> Result<Vec<CurriculumNode>, ApiError> {
        self.execute(self.http.get(self.url("/classroom/curriculum")))
            .await
    }

    /// `GET /classroom/curriculum/{id}`
    pub async fn curriculum_node(&self, node_id: &str) -> Result<CurriculumNode, ApiError> {
        self.execute(self.http.get(self.url(&format!("/classroom/curriculum/{node_id}"))))
            .await
    }

    /// Curriculum browsing is optional: failures degrade to an empty tree so
    /// the feature disables itself instead of blocking classroom use.
    pub async fn curriculum_tree_or_empty(&self) -> Vec<CurriculumNode> {
        match self.curriculum_tree().await {
            Ok(tree) => tree,
            Err(e) => {
                log::warn!("api: curriculum unavailable, browsing disabled: {e}");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, IdentityConfig};

    fn make_client(token: Option<&str>) -> ApiClient {
        let backend = BackendConfig {
            base_url: "http://localhost:7860/".into(),
            token: token.map(|t| t.to_string()),
            ..BackendConfig::default()
        };
        ApiClient::new(backend, IdentityConfig::default())
    }

    #[test]
    fn new_builds_without_panic() {
        let _ = make_client(None);
        let _ = make_client(Some(""));
        let _ = make_client(Some("bearer-xyz"));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let client = make_client(None);
        assert_eq!(
            client.url("/classroom/rooms"),
            "http://localhost:7860/classroom/rooms"
        );
    }

    #[test]
    fn client_is_cloneable() {
        let client = make_client(None);
        let _clone = client.clone();
    }

    #[test]
    fn error_display_includes_detail_and_status() {
        let err = ApiError::Status {
            status: 403,
            detail: "only teachers may create rooms".into(),
        };
        let text = err.to_string();
        assert!(text.contains("only teachers may create rooms"));
        assert!(text.contains("403"));
    }

    /// Transport failures against a port nobody listens on must surface as
    /// `Request` (or `Timeout`), never panic.
    #[tokio::test]
    async fn unreachable_backend_yields_request_error() {
        let backend = BackendConfig {
            // Port 1 on loopback is refused immediately.
            base_url: "http://127.0.0.1:1".into(),
            token: None,
            ..BackendConfig::default()
        };
        let client = ApiClient::new(backend, IdentityConfig::default());

        let err = client.list_rooms().await.unwrap_err();
        assert!(matches!(err, ApiError::Request(_) | ApiError::Timeout));
    }
}
