//! Event dispatch engine
//!
//! Accepts requests from any thread and delivers them to the collector from
//! one background worker, surviving collector outages and process restarts.
//!
//! ## Architecture
//!
//! ```text
//! enqueue ──► Connected? ──yes──► PendingQueue ──► worker ──► Transport
//!                 │                    ▲               │
//!                 no                   │ reconnect     │ send failed
//!                 ▼                    │               ▼
//!           OverflowStore ◄────────────┴──── checkpoint queue to disk
//! ```
//!
//! - The worker is the only writer of the connection state and the only
//!   consumer of the pending queue.
//! - Callers never block on the network and never see delivery errors.
//! - Delivery is sequential: within one run requests reach the collector in
//!   enqueue order, and a failed request is retried before anything behind
//!   it.
//! - Retries are unbounded. A request the collector always rejects is
//!   retried forever.

mod dispatcher;
mod overflow;
mod queue;
mod request;
mod state;

pub use dispatcher::{Dispatcher, WorkerHandle};
pub use overflow::{OverflowGuard, OverflowStore};
pub use queue::PendingQueue;
pub use request::QueuedRequest;
pub use state::ConnectionState;
