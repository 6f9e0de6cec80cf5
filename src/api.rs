//! Wire format for the ingestion and reporting endpoints. Shared by the
//! agent's HTTP sink and the server handlers so both sides agree on the
//! payload shape.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{CapturedObservation, KeylogEntry, Observation, Productivity};

pub const OBSERVATIONS_PATH: &str = "/api/observations";
pub const KEYLOGS_PATH: &str = "/api/keylogs";
pub const USER_RESOLVE_PATH: &str = "/api/users/resolve";

pub const HEADER_TOTAL_COUNT: &str = "X-Total-Count";
pub const HEADER_PAGE: &str = "X-Page";
pub const HEADER_PER_PAGE: &str = "X-Per-Page";
pub const HEADER_TOTAL_PAGES: &str = "X-Total-Pages";

fn default_duration_seconds() -> u32 {
    10
}

/// One observation as submitted by the agent. Any category/productivity
/// a client might attach is not even representable here; classification
/// is server-authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub monitored_user_id: i64,
    pub idle_seconds: u32,
    pub active_window_title: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u32,
    /// Base64-encoded image payload. Stripped server-side when the
    /// decoded size exceeds the configured cap.
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub face_presence_seconds: Option<u32>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

impl From<&CapturedObservation> for IngestRequest {
    fn from(captured: &CapturedObservation) -> Self {
        IngestRequest {
            monitored_user_id: captured.monitored_user_id,
            idle_seconds: captured.idle_seconds,
            active_window_title: captured.window_title.to_string(),
            domain: captured.domain.as_ref().map(|v| v.to_string()),
            application: captured.application.as_ref().map(|v| v.to_string()),
            duration_seconds: captured.duration_seconds,
            screenshot: captured.screenshot.as_ref().map(|b| BASE64.encode(b)),
            face_presence_seconds: captured.face_presence_seconds,
            captured_at: Some(captured.captured_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub id: Uuid,
    pub category: String,
    pub productivity: Productivity,
    pub user_name: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeylogRequest {
    pub monitored_user_id: i64,
    pub captured_at: DateTime<Utc>,
    /// Already privacy-filtered on the agent side.
    pub text_content: String,
    pub window_title: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub application: Option<String>,
}

impl From<&KeylogEntry> for KeylogRequest {
    fn from(entry: &KeylogEntry) -> Self {
        KeylogRequest {
            monitored_user_id: entry.monitored_user_id,
            captured_at: entry.captured_at,
            text_content: entry.text.clone(),
            window_title: entry.window_title.to_string(),
            domain: entry.domain.as_ref().map(|v| v.to_string()),
            application: entry.application.as_ref().map(|v| v.to_string()),
        }
    }
}

/// Manual category/productivity override for a stored observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub productivity: Option<Productivity>,
}

/// One row of the ungrouped report. Screenshot bytes stay server-side,
/// only their presence is reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRow {
    pub id: Uuid,
    pub monitored_user_id: i64,
    pub captured_at: DateTime<Utc>,
    pub window_title: String,
    pub idle_seconds: u32,
    pub domain: Option<String>,
    pub application: Option<String>,
    pub duration_seconds: u32,
    pub has_screenshot: bool,
    pub face_presence_seconds: Option<u32>,
    pub category: String,
    pub productivity: Productivity,
}

impl From<&Observation> for ObservationRow {
    fn from(obs: &Observation) -> Self {
        ObservationRow {
            id: obs.id,
            monitored_user_id: obs.monitored_user_id,
            captured_at: obs.captured_at,
            window_title: obs.window_title.to_string(),
            idle_seconds: obs.idle_seconds,
            domain: obs.domain.as_ref().map(|v| v.to_string()),
            application: obs.application.as_ref().map(|v| v.to_string()),
            duration_seconds: obs.duration_seconds,
            has_screenshot: obs.has_screenshot(),
            face_presence_seconds: obs.face_presence_seconds,
            category: obs.category.to_string(),
            productivity: obs.productivity,
        }
    }
}

/// One same-user/same-window/same-day collapse of the grouped report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedRow {
    pub monitored_user_id: i64,
    pub window_title: String,
    pub day: NaiveDate,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub min_idle_seconds: u32,
    pub observation_count: u64,
    pub total_duration_seconds: u64,
    pub has_screenshot: bool,
    pub category: String,
    pub productivity: Productivity,
}

/// Directory lookup response for the agent's user resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub os_user: String,
    pub department_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
