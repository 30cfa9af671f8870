//! # Session Diagnostics
//!
//! Surface what a session is doing without tying callers to a particular
//! sink. A session reports every noteworthy step to one `SessionObserver`;
//! the library itself never installs a global subscriber.
//!
//! ## Design Principles
//! 1. **Borrowed Events**: `SessionEvent` borrows from the session, so
//!    reporting allocates nothing.
//! 2. **Accumulator Pattern**: `MetricsObserver` aggregates events into
//!    relaxed atomic counters.
//! 3. **Default Sink**: `TracingObserver` forwards to `tracing`, leaving
//!    filtering and output to the application's subscriber.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, info, warn};

use xrtc_common::{Endpoint, ProtocolError};

/// One step of a session's life.
#[derive(Debug, Clone, Copy)]
pub enum SessionEvent<'a> {
    LoggedIn {
        url: &'a str,
        server_timestamp: i64,
    },
    RequestSent {
        endpoint: Endpoint,
        url: &'a str,
        bytes: usize,
    },
    /// A get response chunk was decoded into `items` items.
    ChunkDecoded {
        url: &'a str,
        items: usize,
    },
    /// A bad chunk was dropped under `ChunkPolicy::Skip`.
    ChunkSkipped {
        error: &'a ProtocolError,
    },
    Failed {
        endpoint: Endpoint,
        error: &'a ProtocolError,
    },
    Closed,
}

/// Receiver for session events. Called inline on the task that produced
/// the event, so implementations should return quickly.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent<'_>);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent<'_>) {
        match *event {
            SessionEvent::LoggedIn {
                url,
                server_timestamp,
            } => info!(url, server_timestamp, "session established"),
            SessionEvent::RequestSent {
                endpoint,
                url,
                bytes,
            } => debug!(%endpoint, url, bytes, "request sent"),
            SessionEvent::ChunkDecoded { url, items } => debug!(url, items, "chunk decoded"),
            SessionEvent::ChunkSkipped { error } => warn!(%error, "skipping response chunk"),
            SessionEvent::Failed { endpoint, error } => {
                error!(%endpoint, kind = %error.kind(), %error, "operation failed")
            }
            SessionEvent::Closed => info!("session closed"),
        }
    }
}

/// Snapshot of `MetricsObserver` counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub request_bytes_total: u64,
    pub items_total: u64,
    pub chunks_skipped: u64,
    pub failures_total: u64,
}

/// Counts session events.
///
/// `Ordering::Relaxed` is enough: counters are independent and only need
/// to be eventually consistent.
#[derive(Debug, Default)]
pub struct MetricsObserver {
    requests_total: AtomicU64,
    request_bytes_total: AtomicU64,
    items_total: AtomicU64,
    chunks_skipped: AtomicU64,
    failures_total: AtomicU64,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            request_bytes_total: self.request_bytes_total.load(Ordering::Relaxed),
            items_total: self.items_total.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
        }
    }
}

impl SessionObserver for MetricsObserver {
    fn on_event(&self, event: &SessionEvent<'_>) {
        match *event {
            SessionEvent::RequestSent { bytes, .. } => {
                self.requests_total.fetch_add(1, Ordering::Relaxed);
                self.request_bytes_total
                    .fetch_add(bytes as u64, Ordering::Relaxed);
            }
            SessionEvent::ChunkDecoded { items, .. } => {
                self.items_total.fetch_add(items as u64, Ordering::Relaxed);
            }
            SessionEvent::ChunkSkipped { .. } => {
                self.chunks_skipped.fetch_add(1, Ordering::Relaxed);
            }
            SessionEvent::Failed { .. } => {
                self.failures_total.fetch_add(1, Ordering::Relaxed);
            }
            SessionEvent::LoggedIn { .. } | SessionEvent::Closed => {}
        }
    }
}
