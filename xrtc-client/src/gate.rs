//! # Concurrency Gate
//!
//! Purpose: Bound the number of simultaneous in-flight exchanges of one
//! session and carry the session's shutdown signal.
//!
//! ## Design Principles
//! 1. **Counting Semaphore**: One permit per outbound exchange, handed out in
//!    FIFO order by `tokio::sync::Semaphore`.
//! 2. **RAII Permits**: `GatePermit` returns its slot on drop, so a stream
//!    that is abandoned mid-iteration cannot leak capacity.
//! 3. **Single Teardown Path**: `close` cancels every in-flight exchange and
//!    fails every waiter; later acquisitions fail immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use xrtc_common::{ProtocolError, Result};

#[derive(Debug)]
struct GateInner {
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    limit: usize,
}

/// Shared handle to a session's permit pool and shutdown signal.
#[derive(Debug, Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    /// Creates a gate admitting at most `limit` concurrent exchanges.
    pub fn new(limit: usize) -> Self {
        Gate {
            inner: Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(limit)),
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
                limit,
            }),
        }
    }

    /// Waits for a free permit.
    ///
    /// # Errors
    /// Returns a `Closed` error if the gate is closed before or while
    /// waiting.
    pub async fn acquire(&self) -> Result<GatePermit> {
        if self.is_closed() {
            return Err(ProtocolError::closed("Session is closed"));
        }
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProtocolError::closed("Session is closed"))?;
        Ok(GatePermit { _permit: permit })
    }

    /// Closes the gate. Returns true only for the call that performed the
    /// transition.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.shutdown.cancel();
        self.inner.semaphore.close();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once the gate is closed.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.shutdown.cancelled()
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }
}

/// One admitted exchange; releases its slot on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}
