//! # beacon-core
//!
//! Client-side event delivery for activity collectors.
//!
//! This library provides:
//! - Domain types for events and buckets
//! - A dispatch engine that delivers requests in order from a background
//!   worker, spilling to a durable overflow file while the collector is
//!   unreachable
//! - An HTTP transport for the collector's REST API
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_core::{ActivityClient, Config, Event};
//!
//! # async fn run() -> beacon_core::Result<()> {
//! let config = Config::load()?;
//! let client = ActivityClient::new(config.client_config("aw-watcher-window", false))?;
//!
//! client.setup_bucket("aw-watcher-window_myhost", "currentwindow");
//! client.connect()?;
//!
//! let event = Event::new(chrono::Utc::now(), serde_json::Map::new());
//! client.heartbeat("aw-watcher-window_myhost", &event, 5.0);
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use client::ActivityClient;
pub use config::{ClientConfig, Config};
pub use dispatch::{ConnectionState, Dispatcher, OverflowStore, QueuedRequest};
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod client;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod types;
