//! Core domain types for beacon
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | A timestamped activity record with a duration and free-form data |
//! | **Bucket** | A named container on the collector that holds events of one type |
//! | **Heartbeat** | An event that extends the previous one when their data matches |
//! | **Pulsetime** | Window (seconds) within which a heartbeat may merge with the last event |
//!
//! Events are serialized exactly as the collector expects them; the dispatch
//! layer never looks inside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Event
// ============================================

/// A single activity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Server-assigned id, absent until the collector has stored the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Start of the activity
    pub timestamp: DateTime<Utc>,
    /// Length of the activity in seconds
    #[serde(default)]
    pub duration: f64,
    /// Watcher-specific payload (window title, app name, ...)
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// A zero-duration event.
    pub fn new(timestamp: DateTime<Utc>, data: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::with_duration(timestamp, 0.0, data)
    }

    pub fn with_duration(
        timestamp: DateTime<Utc>,
        duration: f64,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            duration,
            data,
        }
    }
}

// ============================================
// Buckets
// ============================================

/// A bucket as reported by `GET /buckets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

/// A locally registered bucket, created on the collector during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketSpec {
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub client: String,
    pub hostname: String,
}
