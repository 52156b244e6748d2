//! In-memory pending queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::QueuedRequest;

/// Unbounded FIFO with blocking dequeue.
///
/// Requests taken with [`pop`](Self::pop) count as in flight until the
/// consumer reports back with [`complete`](Self::complete) or
/// [`requeue`](Self::requeue), so [`is_idle`](Self::is_idle) never reports
/// an empty queue while a send is still running.
#[derive(Debug, Default)]
pub struct PendingQueue {
    inner: Mutex<Inner>,
    available: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<QueuedRequest>,
    in_flight: usize,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_back(&self, request: QueuedRequest) {
        self.lock().items.push_back(request);
        self.available.notify_one();
    }

    /// Put `requests` ahead of everything queued, keeping their order.
    pub fn prepend(&self, requests: Vec<QueuedRequest>) {
        if requests.is_empty() {
            return;
        }
        {
            let mut inner = self.lock();
            for request in requests.into_iter().rev() {
                inner.items.push_front(request);
            }
        }
        self.available.notify_one();
    }

    /// Wait for the next request and mark it in flight.
    ///
    /// Cancel-safe: a request is removed only in the poll that returns it.
    pub async fn pop(&self) -> QueuedRequest {
        loop {
            let notified = self.available.notified();
            {
                let mut inner = self.lock();
                if let Some(request) = inner.items.pop_front() {
                    inner.in_flight += 1;
                    return request;
                }
            }
            notified.await;
        }
    }

    /// The in-flight request was delivered.
    pub fn complete(&self) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    /// The in-flight request failed; it goes back to the front.
    pub fn requeue(&self, request: QueuedRequest) {
        {
            let mut inner = self.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
            inner.items.push_front(request);
        }
        self.available.notify_one();
    }

    /// Remove and return everything queued, oldest first.
    pub fn drain(&self) -> Vec<QueuedRequest> {
        self.lock().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        let inner = self.lock();
        inner.items.is_empty() && inner.in_flight == 0
    }
}
