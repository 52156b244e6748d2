//! Public entry point for watchers.
//!
//! Write calls (`send_event`, `heartbeat`, ...) return immediately and never
//! fail because the collector is down; the dispatcher absorbs that. Read
//! calls (`get_buckets`, `get_events`) go straight to the collector and fail
//! loudly when it is unreachable.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::collector::{endpoints, HttpTransport, Transport};
use crate::config::ClientConfig;
use crate::dispatch::{ConnectionState, Dispatcher, OverflowStore, QueuedRequest, WorkerHandle};
use crate::error::Result;
use crate::types::{Bucket, BucketSpec, Event};

/// Interval at which [`ActivityClient::flush`] re-checks the dispatcher.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Client for one watcher identity.
pub struct ActivityClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    worker: Mutex<Option<WorkerHandle>>,
}

impl ActivityClient {
    /// Create a client talking HTTP to `config.server_url`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    /// Create a client over any [`Transport`]
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let overflow = OverflowStore::open(config.overflow_path())?;
        let dispatcher = Dispatcher::new(transport.clone(), overflow, config.reconnect_interval);

        Ok(Self {
            config,
            transport,
            dispatcher,
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_name(&self) -> &str {
        &self.config.client_name
    }

    pub fn state(&self) -> ConnectionState {
        self.dispatcher.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Requests waiting in memory
    pub fn pending_len(&self) -> usize {
        self.dispatcher.pending_len()
    }

    /// Requests waiting on disk
    pub fn overflow_len(&self) -> Result<usize> {
        self.dispatcher.overflow_len()
    }

    // ============================================
    // Buckets
    // ============================================

    /// Register a bucket to be created on the collector when connecting.
    ///
    /// Local bookkeeping only; the last registration for an id wins.
    pub fn setup_bucket(&self, bucket_id: &str, event_type: &str) {
        self.dispatcher.register_bucket(BucketSpec {
            id: bucket_id.to_string(),
            event_type: event_type.to_string(),
            client: self.config.client_name.clone(),
            hostname: self.config.hostname.clone(),
        });
    }

    /// All buckets on the collector, keyed by id
    pub async fn get_buckets(&self) -> Result<BTreeMap<String, Bucket>> {
        let listing = self.transport.get(&endpoints::buckets()).await?;
        Ok(serde_json::from_value(listing)?)
    }

    /// Events in a bucket, newest first as returned by the collector
    pub async fn get_events(&self, bucket_id: &str, limit: Option<u32>) -> Result<Vec<Event>> {
        let events = self
            .transport
            .get(&endpoints::events_limited(bucket_id, limit))
            .await?;
        Ok(serde_json::from_value(events)?)
    }

    // ============================================
    // Writes
    // ============================================

    pub fn send_event(&self, bucket_id: &str, event: &Event) {
        self.submit(endpoints::events(bucket_id), event);
    }

    /// Send several events as one request
    pub fn send_events(&self, bucket_id: &str, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        self.submit(endpoints::events(bucket_id), events);
    }

    /// Overwrite the most recent event in the bucket
    pub fn replace_last_event(&self, bucket_id: &str, event: &Event) {
        self.submit(endpoints::replace_last(bucket_id), event);
    }

    /// Merge `event` into the last one if their data match and it falls
    /// within `pulsetime` seconds of its end; otherwise insert it.
    pub fn heartbeat(&self, bucket_id: &str, event: &Event, pulsetime: f64) {
        self.submit(endpoints::heartbeat(bucket_id, pulsetime), event);
    }

    fn submit<T: Serialize + ?Sized>(&self, endpoint: String, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(data) => self.dispatcher.enqueue(QueuedRequest::new(endpoint, data)),
            Err(e) => error!(
                endpoint = %endpoint,
                error = %e,
                "Failed to serialize payload, event dropped"
            ),
        }
    }

    // ============================================
    // Lifecycle
    // ============================================

    fn worker(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the background dispatcher. No-op if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let mut worker = self.worker();
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            debug!(client = %self.config.client_name, "Dispatcher already running");
            return Ok(());
        }

        *worker = Some(self.dispatcher.spawn()?);
        info!(
            client = %self.config.client_name,
            server = %self.config.server_url,
            "Started dispatcher"
        );
        Ok(())
    }

    /// Stop the background dispatcher and wait for it to exit.
    ///
    /// A send already in flight completes first. Whatever is still queued
    /// in memory is written to the overflow store.
    ///
    /// Await this before dropping the client. Dropping a connected client
    /// still persists the in-memory queue, but a send in flight is lost if
    /// the runtime shuts down before it finishes.
    pub async fn disconnect(&self) {
        let worker = self.worker().take();
        if let Some(worker) = worker {
            worker.shutdown().await;
            info!(client = %self.config.client_name, "Stopped dispatcher");
        }
    }

    /// Wait until everything queued has been delivered.
    ///
    /// Returns false if `timeout` expires first (for instance because the
    /// collector is down).
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.dispatcher.is_idle() && self.overflow_len().map(|n| n == 0).unwrap_or(false) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }
    }
}

impl Drop for ActivityClient {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().take() {
            worker.cancel();
            if !worker.is_finished() {
                warn!(
                    client = %self.config.client_name,
                    pending = self.dispatcher.pending_len(),
                    "Client dropped without disconnect, persisting pending requests"
                );
                // The runtime may drop the worker before it checkpoints
                self.dispatcher.persist_pending();
            }
        }
    }
}
