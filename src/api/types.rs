//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::audit::types::{AuditOptions, AuditProgress, AuditStatus};
use crate::session::SessionStatus;

/// Request to create a new audit session.
#[derive(Debug, Deserialize)]
pub struct SessionStartRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct SessionStartResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub ttl_minutes: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct OpenLoginResponse {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MarkLoggedInResponse {
    pub ok: bool,
    pub message: String,
}

/// Request to start an audit against an authenticated session.
#[derive(Debug, Deserialize)]
pub struct AuditRunRequest {
    pub session_id: String,
    pub url: String,
    #[serde(default)]
    pub options: AuditOptions,
}

#[derive(Debug, Serialize)]
pub struct AuditRunResponse {
    pub audit_id: String,
    pub status: AuditStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AuditStatusResponse {
    pub audit_id: String,
    pub status: AuditStatus,
    pub progress: AuditProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_findings: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub active_sessions: usize,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
