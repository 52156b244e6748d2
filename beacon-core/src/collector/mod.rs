//! Collector wire layer
//!
//! Everything that knows about the remote collector's HTTP API lives here:
//! the request paths and the transport that performs a single exchange.
//!
//! ## Remote API
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/api/0/buckets/` | list buckets |
//! | POST | `/api/0/buckets/{id}` | create bucket |
//! | GET/POST | `/api/0/buckets/{id}/events` | read / insert events |
//! | POST | `/api/0/buckets/{id}/events/replace_last` | overwrite newest event |
//! | POST | `/api/0/buckets/{id}/heartbeat?pulsetime={n}` | merge-or-insert |

mod client;
pub mod endpoints;

pub use client::{HttpTransport, Transport};
