//! Domain entities shared between the capture agent and the server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Productivity class attached to a tag and, through classification, to
/// every stored observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Productivity {
    Productive,
    Nonproductive,
    Neutral,
}

/// One capture tick as produced by the agent, before the server has
/// classified it. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedObservation {
    pub monitored_user_id: i64,
    pub captured_at: DateTime<Utc>,
    pub window_title: Arc<str>,
    pub idle_seconds: u32,
    pub domain: Option<Arc<str>>,
    pub application: Option<Arc<str>>,
    pub duration_seconds: u32,
    pub screenshot: Option<Vec<u8>>,
    pub face_presence_seconds: Option<u32>,
}

/// The stored, classified form of an observation. `category` and
/// `productivity` are server-assigned and may later be overwritten by a
/// manual override, nothing else mutates after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub monitored_user_id: i64,
    pub captured_at: DateTime<Utc>,
    pub window_title: Arc<str>,
    pub idle_seconds: u32,
    pub domain: Option<Arc<str>>,
    pub application: Option<Arc<str>>,
    pub duration_seconds: u32,
    pub screenshot: Option<Vec<u8>>,
    pub face_presence_seconds: Option<u32>,
    pub category: Arc<str>,
    pub productivity: Productivity,
}

impl Observation {
    pub fn has_screenshot(&self) -> bool {
        self.screenshot.is_some()
    }
}

/// Reconstructed typed text for one buffered span. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeylogEntry {
    pub monitored_user_id: i64,
    /// Start of the buffered span, not the flush moment.
    pub captured_at: DateTime<Utc>,
    pub text: String,
    pub window_title: Arc<str>,
    pub domain: Option<Arc<str>>,
    pub application: Option<Arc<str>>,
}

/// Administrator-configured classification label. `department_id = None`
/// means globally scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: Arc<str>,
    pub productivity: Productivity,
    pub department_id: Option<i64>,
    #[serde(default)]
    pub priority_tier: i32,
}

/// Keyword trigger owned by a tag. Weight is the decisive ranking key
/// during classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagKeyword {
    pub tag_id: i64,
    pub keyword: String,
    pub weight: u32,
}

/// The single best classification match committed for an observation.
/// Confidence is only comparable between candidates of the same
/// observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub observation_id: Uuid,
    pub tag_id: i64,
    pub confidence: f32,
}

/// Tracked employee identity, distinct from any login identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredUser {
    pub id: i64,
    pub name: Arc<str>,
    /// OS account name the agent matches against the logged-in user.
    pub os_user: Arc<str>,
    pub department_id: Option<i64>,
}

/// Fallback categories applied when no tag keyword matches.
pub const CATEGORY_IDLE: &str = "Idle";
pub const CATEGORY_AWAY: &str = "Away";
pub const CATEGORY_UNCLASSIFIED: &str = "Unclassified";
