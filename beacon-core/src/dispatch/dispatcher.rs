//! The background delivery worker and its connection state machine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::overflow::{OverflowGuard, OverflowStore};
use super::queue::PendingQueue;
use super::state::{ConnectionState, StateCell};
use super::QueuedRequest;
use crate::collector::{endpoints, Transport};
use crate::error::{Error, Result};
use crate::types::BucketSpec;

/// Owns delivery order, retry, and connection state.
///
/// Cheap to clone; clones share one queue, one overflow store and one
/// state. At most one worker should run per dispatcher (the client facade
/// enforces this).
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    queue: PendingQueue,
    state: StateCell,
    overflow: OverflowStore,
    buckets: Mutex<BTreeMap<String, BucketSpec>>,
    transport: Arc<dyn Transport>,
    reconnect_interval: Duration,
}

/// Handle to a running dispatcher worker.
pub struct WorkerHandle {
    cancellation_token: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to stop at its next loop boundary.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel and wait for the worker to exit.
    ///
    /// A send already in flight completes first.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "Dispatcher worker panicked");
        }
    }
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        overflow: OverflowStore,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: PendingQueue::new(),
                state: StateCell::new(ConnectionState::Disconnected),
                overflow,
                buckets: Mutex::new(BTreeMap::new()),
                transport,
                reconnect_interval,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Requests waiting in memory (not counting one in flight)
    pub fn pending_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Records waiting on disk
    pub fn overflow_len(&self) -> Result<usize> {
        self.inner.overflow.len()
    }

    pub fn overflow(&self) -> &OverflowStore {
        &self.inner.overflow
    }

    /// Connected with nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.state() == ConnectionState::Connected && self.inner.queue.is_idle()
    }

    /// Register a bucket to be ensured during the next handshake.
    ///
    /// Re-registering an id replaces the previous entry.
    pub fn register_bucket(&self, spec: BucketSpec) {
        let mut buckets = self
            .inner
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(bucket = %spec.id, event_type = %spec.event_type, "Registered bucket");
        buckets.insert(spec.id.clone(), spec);
    }

    /// Hand a request to the dispatch subsystem. Never blocks on the network.
    ///
    /// While connected the request joins the in-memory queue. Otherwise it is
    /// appended to the overflow store; if that write fails the request is
    /// lost and the failure is logged.
    pub fn enqueue(&self, request: QueuedRequest) {
        if self.state() == ConnectionState::Connected {
            self.inner.queue.push_back(request);
            return;
        }

        let overflow = self.inner.overflow.lock();
        // The worker flips state only while holding this lock
        if self.state() == ConnectionState::Connected {
            drop(overflow);
            self.inner.queue.push_back(request);
            return;
        }

        match overflow.append(&request) {
            Ok(()) => debug!(endpoint = %request.endpoint(), "Queued request to overflow store"),
            Err(e) => error!(
                endpoint = %request.endpoint(),
                error = %e,
                "Failed to persist request, event lost"
            ),
        }
    }

    /// Start the worker on the current tokio runtime.
    pub fn spawn(&self) -> Result<WorkerHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(format!("dispatcher needs a tokio runtime: {}", e)))?;

        let cancellation_token = CancellationToken::new();
        let worker = self.clone();
        let token = cancellation_token.clone();
        let join = runtime.spawn(async move { worker.run(token).await });

        Ok(WorkerHandle {
            cancellation_token,
            join,
        })
    }

    /// Worker loop: handshake until connected, deliver until a send fails,
    /// back off, repeat. Exits when `cancellation_token` fires.
    pub async fn run(self, cancellation_token: CancellationToken) {
        self.inner.state.set(ConnectionState::Disconnected);
        info!(
            reconnect_interval = ?self.inner.reconnect_interval,
            "Dispatcher started"
        );

        'outer: loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            if let Err(e) = self.handshake().await {
                warn!(
                    error = %e,
                    retry_in = ?self.inner.reconnect_interval,
                    "Collector handshake failed"
                );
                if self.backoff(&cancellation_token).await {
                    continue;
                }
                break;
            }
            if let Err(e) = self.enter_connected() {
                error!(
                    path = %self.inner.overflow.path().display(),
                    error = %e,
                    retry_in = ?self.inner.reconnect_interval,
                    "Failed to load overflow store, staying offline"
                );
                if self.backoff(&cancellation_token).await {
                    continue;
                }
                break;
            }

            loop {
                let request = tokio::select! {
                    biased;
                    () = cancellation_token.cancelled() => break 'outer,
                    request = self.inner.queue.pop() => request,
                };

                match self
                    .inner
                    .transport
                    .post(request.endpoint(), request.data())
                    .await
                {
                    Ok(()) => {
                        self.inner.queue.complete();
                        debug!(endpoint = %request.endpoint(), "Delivered request");
                    }
                    Err(e) => {
                        warn!(
                            endpoint = %request.endpoint(),
                            error = %e,
                            "Delivery failed, going offline"
                        );
                        self.enter_disconnected(request);
                        break;
                    }
                }
            }

            if !self.backoff(&cancellation_token).await {
                break;
            }
        }

        self.stop();
        info!("Dispatcher stopped");
    }

    /// Bring the collector up to date: every registered bucket must exist.
    async fn handshake(&self) -> Result<()> {
        let specs: Vec<BucketSpec> = {
            let buckets = self
                .inner
                .buckets
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            buckets.values().cloned().collect()
        };

        let listing = self.inner.transport.get(&endpoints::buckets()).await?;
        let existing = listing.as_object().ok_or_else(|| {
            Error::Transport(format!("unexpected bucket listing: {}", listing))
        })?;

        for spec in specs.iter().filter(|s| !existing.contains_key(&s.id)) {
            let body = serde_json::to_value(spec)?;
            self.inner
                .transport
                .post(&endpoints::bucket(&spec.id), &body)
                .await?;
            info!(bucket = %spec.id, event_type = %spec.event_type, "Created bucket");
        }

        Ok(())
    }

    /// Disconnected -> Connected. Overflow records go ahead of anything
    /// already in memory since they are older.
    ///
    /// If the store cannot be loaded the state stays Disconnected and the
    /// records stay on disk.
    fn enter_connected(&self) -> Result<()> {
        let overflow = self.inner.overflow.lock();

        let records = overflow.load_and_clear()?;
        if !records.is_empty() {
            info!(count = records.len(), "Loaded queued requests from overflow store");
        }
        self.inner.queue.prepend(records);

        // Published only once the backlog is queued, so `is_idle` cannot
        // see Connected with the backlog missing
        self.inner.state.set(ConnectionState::Connected);

        info!("Connected to collector");
        Ok(())
    }

    /// Connected -> Disconnected. The failed request is retried first; the
    /// whole queue moves to disk so nothing is held in two places.
    fn enter_disconnected(&self, failed: QueuedRequest) {
        let overflow = self.inner.overflow.lock();
        self.inner.state.set(ConnectionState::Disconnected);
        self.inner.queue.requeue(failed);
        self.checkpoint(&overflow);
        info!("Disconnected from collector");
    }

    /// Any state -> Stopped, persisting whatever is still in memory.
    fn stop(&self) {
        let overflow = self.inner.overflow.lock();
        self.inner.state.set(ConnectionState::Stopped);
        self.checkpoint(&overflow);
    }

    /// Write whatever is queued in memory to the overflow store now.
    ///
    /// A request already in flight is not included.
    pub fn persist_pending(&self) {
        let overflow = self.inner.overflow.lock();
        self.checkpoint(&overflow);
    }

    /// Move the pending queue behind the overflow store's current records.
    fn checkpoint(&self, overflow: &OverflowGuard<'_>) {
        let drained = self.inner.queue.drain();
        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        let result = overflow.read_all().and_then(|mut records| {
            records.extend(drained.iter().cloned());
            overflow.overwrite(&records)
        });

        match result {
            Ok(()) => info!(count, "Checkpointed pending requests to overflow store"),
            Err(e) => {
                error!(
                    count,
                    error = %e,
                    "Failed to checkpoint pending requests, keeping them in memory"
                );
                self.inner.queue.prepend(drained);
            }
        }
    }

    /// Sleep the reconnect interval. Returns false if cancelled instead.
    async fn backoff(&self, cancellation_token: &CancellationToken) -> bool {
        tokio::select! {
            () = cancellation_token.cancelled() => false,
            () = tokio::time::sleep(self.inner.reconnect_interval) => true,
        }
    }
}
