//! Collector-relative request paths
//!
//! Every path is relative to `{server_url}/api/0/`. Bucket ids are
//! percent-encoded since watchers commonly embed host names in them.

use urlencoding::encode;

pub fn buckets() -> String {
    "buckets/".to_string()
}

pub fn bucket(bucket_id: &str) -> String {
    format!("buckets/{}", encode(bucket_id))
}

pub fn events(bucket_id: &str) -> String {
    format!("buckets/{}/events", encode(bucket_id))
}

pub fn events_limited(bucket_id: &str, limit: Option<u32>) -> String {
    match limit {
        Some(limit) => format!("{}?limit={}", events(bucket_id), limit),
        None => events(bucket_id),
    }
}

pub fn replace_last(bucket_id: &str) -> String {
    format!("buckets/{}/events/replace_last", encode(bucket_id))
}

/// Heartbeat path; `pulsetime` is the merge window in seconds.
pub fn heartbeat(bucket_id: &str, pulsetime: f64) -> String {
    format!(
        "buckets/{}/heartbeat?pulsetime={}",
        encode(bucket_id),
        pulsetime
    )
}
