use serde::{Deserialize, Serialize};

/// One undelivered unit of work: a collector path and its JSON body.
///
/// Immutable once built. The same shape is used for overflow records on
/// disk, one JSON object per line:
///
/// ```json
/// {"endpoint": "buckets/window/events", "data": {"timestamp": "...", "duration": 0.0, "data": {}}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    endpoint: String,
    data: serde_json::Value,
}

impl QueuedRequest {
    pub fn new(endpoint: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            data,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }
}
