#![allow(dead_code)]

use async_trait::async_trait;
use beacon_core::collector::Transport;
use beacon_core::{ActivityClient, ClientConfig, Error, Event, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// In-memory stand-in for the collector.
///
/// Records every event post, can be taken offline, can fail chosen
/// payloads once, and can hold posts until the test releases them.
pub struct MockCollector {
    offline: AtomicBool,
    buckets: Mutex<BTreeMap<String, Value>>,
    created: Mutex<Vec<(String, Value)>>,
    attempts: Mutex<Vec<String>>,
    delivered: Mutex<Vec<String>>,
    fail_once: Mutex<Vec<String>>,
    listings: AtomicUsize,
    gated: AtomicBool,
    gate: Semaphore,
}

impl MockCollector {
    fn new(offline: bool) -> Self {
        Self {
            offline: AtomicBool::new(offline),
            buckets: Mutex::new(BTreeMap::new()),
            created: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            fail_once: Mutex::new(Vec::new()),
            listings: AtomicUsize::new(0),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    pub fn online() -> Arc<Self> {
        Arc::new(Self::new(false))
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self::new(true))
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next delivery attempt of the event labelled `label`.
    pub fn fail_once(&self, label: &str) {
        self.fail_once.lock().unwrap().push(label.to_string());
    }

    /// Hold every event post until [`release`](Self::release) is called.
    pub fn hold_posts(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let one held post proceed.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn stop_holding(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1000);
    }

    pub fn add_bucket(&self, id: &str) {
        self.buckets
            .lock()
            .unwrap()
            .insert(id.to_string(), serde_json::json!({ "id": id, "type": "test" }));
    }

    /// Labels of successfully delivered events, in arrival order
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    /// Labels of every delivery attempt, in arrival order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    /// Ids of buckets created through `POST /buckets/{id}`
    pub fn created(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn created_bodies(&self) -> Vec<Value> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    /// Number of `GET /buckets/` calls served
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(Error::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Event labels carried in `data.label`; batches contribute every label.
fn labels(body: &Value) -> Vec<String> {
    let events = match body {
        Value::Array(events) => events.clone(),
        other => vec![other.clone()],
    };
    events
        .iter()
        .filter_map(|e| e["data"]["label"].as_str().map(str::to_string))
        .collect()
}

#[async_trait]
impl Transport for MockCollector {
    async fn post(&self, endpoint: &str, body: &Value) -> Result<()> {
        if let Some(id) = endpoint
            .strip_prefix("buckets/")
            .filter(|rest| !rest.contains('/'))
        {
            self.check_online()?;
            self.buckets
                .lock()
                .unwrap()
                .insert(id.to_string(), body.clone());
            self.created
                .lock()
                .unwrap()
                .push((id.to_string(), body.clone()));
            return Ok(());
        }

        let labels = labels(body);
        self.attempts.lock().unwrap().extend(labels.iter().cloned());

        if self.gated.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }

        self.check_online()?;

        {
            let mut fail_once = self.fail_once.lock().unwrap();
            if let Some(pos) = fail_once.iter().position(|l| labels.contains(l)) {
                fail_once.remove(pos);
                return Err(Error::Http {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
        }

        self.delivered.lock().unwrap().extend(labels);
        Ok(())
    }

    async fn get(&self, endpoint: &str) -> Result<Value> {
        self.check_online()?;
        if endpoint == "buckets/" {
            self.listings.fetch_add(1, Ordering::SeqCst);
            let buckets = self.buckets.lock().unwrap().clone();
            return Ok(serde_json::to_value(buckets)?);
        }
        Ok(Value::Array(Vec::new()))
    }
}

pub fn labelled(label: &str) -> Event {
    let mut data = serde_json::Map::new();
    data.insert("label".to_string(), label.into());
    Event::new(chrono::Utc::now(), data)
}

pub fn test_config(storage_root: &Path) -> ClientConfig {
    ClientConfig {
        reconnect_interval: Duration::from_millis(20),
        ..ClientConfig::new("test-watcher", storage_root)
    }
}

pub fn client_with(storage_root: &Path, collector: &Arc<MockCollector>) -> ActivityClient {
    beacon_core::logging::init_test();
    ActivityClient::with_transport(test_config(storage_root), collector.clone())
        .expect("failed to build client")
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub const WAIT: Duration = Duration::from_secs(5);

pub fn strings(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|l| l.to_string()).collect()
}
