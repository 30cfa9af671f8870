//! Blocking wrapper around the async [`Session`](crate::Session).
//!
//! Each call drives the async operation to completion on a small runtime
//! owned by the session, so both flavours share one protocol engine.
//! Do not use this module from inside an async runtime: `block_on` panics
//! there.

use std::fmt;

use futures::StreamExt;
use tokio::runtime::{Builder, Runtime};

use xrtc_common::{GetRequest, Item, LoginResult, ProtocolError, Result, SetRequest};

use crate::config::{ConnectionConfig, Credentials};
use crate::session::{Session as AsyncSession, SessionOptions};
use crate::stream::ItemStream;
use crate::transport::{HttpTransport, ReqwestTransport};

const IO_THREADS: usize = 2;

/// Synchronous session. Methods take `&self`, so one session may be shared
/// between threads; `close` from any thread ends iterators in progress.
pub struct Session<T: HttpTransport = ReqwestTransport> {
    // Declared first so the session closes before its runtime shuts down.
    inner: AsyncSession<T>,
    runtime: Runtime,
}

fn runtime() -> Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(IO_THREADS)
        .thread_name("xrtc-io")
        .enable_all()
        .build()
        .map_err(|err| ProtocolError::configuration("Failed to start I/O runtime").with_source(err))
}

impl Session<ReqwestTransport> {
    /// Blocking counterpart of [`AsyncSession::open`].
    pub fn open(credentials: &Credentials, config: ConnectionConfig) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(AsyncSession::open(credentials, config))?;
        Ok(Session { inner, runtime })
    }
}

impl<T: HttpTransport> Session<T> {
    pub fn open_with(
        transport: T,
        credentials: &Credentials,
        config: ConnectionConfig,
        options: SessionOptions,
    ) -> Result<Self> {
        let runtime = runtime()?;
        let inner =
            runtime.block_on(AsyncSession::open_with(transport, credentials, config, options))?;
        Ok(Session { inner, runtime })
    }

    pub fn login_time(&self) -> i64 {
        self.inner.login_time()
    }

    pub fn login_result(&self) -> LoginResult {
        self.inner.login_result()
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.inner.config()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }

    pub fn set(&self, request: &SetRequest) -> Result<()> {
        self.runtime.block_on(self.inner.set(request))
    }

    pub fn set_items(&self, items: impl IntoIterator<Item = Item>) -> Result<()> {
        self.set(&SetRequest::new(items))
    }

    /// Starts a get; items are read lazily as the iterator advances.
    pub fn get(&self, request: &GetRequest) -> Result<ItemIter<'_>> {
        let stream = self.runtime.block_on(self.inner.get(request))?;
        Ok(ItemIter {
            runtime: &self.runtime,
            stream,
        })
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

impl<T: HttpTransport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Session").field(&self.inner).finish()
    }
}

/// Blocking iterator over the items of one get.
pub struct ItemIter<'a> {
    runtime: &'a Runtime,
    stream: ItemStream,
}

impl ItemIter<'_> {
    /// Detaches the underlying async stream.
    pub fn into_stream(self) -> ItemStream {
        self.stream
    }
}

impl Iterator for ItemIter<'_> {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

impl fmt::Debug for ItemIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemIter").finish_non_exhaustive()
    }
}
