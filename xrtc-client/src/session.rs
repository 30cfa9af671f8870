//! # Async Session
//!
//! Purpose: Own one authenticated connection to the item API and run set
//! and get exchanges over it, bounded by the session's concurrency gate.
//!
//! ## Design Principles
//! 1. **Login Once**: A `Session` only exists after a successful login; a
//!    failed login leaves nothing to clean up.
//! 2. **Gate Every Exchange**: Each outbound request holds one permit while
//!    it is on the wire. A stream get keeps its permit until the stream
//!    ends.
//! 3. **Fail Closed**: A transport failure in any exchange closes the
//!    session; pooled connections are never reused after one.
//!
//! ## Notes
//! - All operations take `&self`; share a session across tasks with `Arc`.
//! - `close` runs on drop as well.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use xrtc_common::{
    Endpoint, GetRequest, Item, LoginResult, Mode, ProtocolError, Result, SetRequest,
    MAX_SERIALIZED_JSON_SIZE,
};

use crate::codec::{self, ChunkPolicy, Framing};
use crate::config::{ConnectionConfig, Credentials};
use crate::gate::{Gate, GatePermit};
use crate::observer::{SessionEvent, SessionObserver, TracingObserver};
use crate::stream::{ItemStream, StreamParts};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

/// Optional session behaviour.
#[derive(Clone)]
pub struct SessionOptions {
    observer: Arc<dyn SessionObserver>,
    chunk_policy: ChunkPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            observer: Arc::new(TracingObserver),
            chunk_policy: ChunkPolicy::default(),
        }
    }
}

impl SessionOptions {
    /// Receiver for diagnostic events. Defaults to [`TracingObserver`].
    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Handling of bad get response chunks. Defaults to
    /// [`ChunkPolicy::Abort`].
    pub fn chunk_policy(mut self, policy: ChunkPolicy) -> Self {
        self.chunk_policy = policy;
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("chunk_policy", &self.chunk_policy)
            .finish_non_exhaustive()
    }
}

/// Authenticated client session.
pub struct Session<T: HttpTransport = ReqwestTransport> {
    transport: Mutex<Option<Arc<T>>>,
    config: ConnectionConfig,
    gate: Gate,
    observer: Arc<dyn SessionObserver>,
    chunk_policy: ChunkPolicy,
    login: LoginResult,
}

impl Session<ReqwestTransport> {
    /// Opens a session over HTTPS with default options.
    ///
    /// # Errors
    /// - `Configuration` for incomplete credentials or settings.
    /// - `Authentication` if the server rejects the login.
    /// - `Transport` / `Protocol` if the login exchange itself fails.
    pub async fn open(credentials: &Credentials, config: ConnectionConfig) -> Result<Self> {
        credentials.validate()?;
        config.validate()?;
        let transport = ReqwestTransport::new(&config)?;
        Session::open_with(transport, credentials, config, SessionOptions::default()).await
    }
}

impl<T: HttpTransport> Session<T> {
    /// Opens a session over a caller-supplied transport.
    pub async fn open_with(
        transport: T,
        credentials: &Credentials,
        config: ConnectionConfig,
        options: SessionOptions,
    ) -> Result<Self> {
        credentials.validate()?;
        config.validate()?;

        let mut session = Session {
            transport: Mutex::new(Some(Arc::new(transport))),
            gate: Gate::new(config.limits.concurrent_requests),
            config,
            observer: options.observer,
            chunk_policy: options.chunk_policy,
            login: LoginResult::default(),
        };
        let login = session.login(credentials).await;
        let login = session.report(Endpoint::Login, login)?;
        session.login = login;
        session.observe(SessionEvent::LoggedIn {
            url: &session.config.login_url,
            server_timestamp: login.server_timestamp,
        });
        Ok(session)
    }

    /// Server timestamp returned by the login exchange.
    pub fn login_time(&self) -> i64 {
        self.login.server_timestamp
    }

    pub fn login_result(&self) -> LoginResult {
        self.login
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// Maximum number of exchanges admitted at once.
    pub fn concurrency_limit(&self) -> usize {
        self.gate.limit()
    }

    /// Gate permits not held by an exchange or open stream.
    pub fn available_permits(&self) -> usize {
        self.gate.available()
    }

    /// Submits a batch of items as one request.
    ///
    /// # Errors
    /// `Validation` if the batch is empty, holds an invalid item or
    /// serializes to more than the API ceiling; nothing is sent then.
    pub async fn set(&self, request: &SetRequest) -> Result<()> {
        let result = self.try_set(request).await;
        self.report(Endpoint::Set, result)
    }

    pub async fn set_items(&self, items: impl IntoIterator<Item = Item>) -> Result<()> {
        self.set(&SetRequest::new(items)).await
    }

    /// Starts a get and returns its items as a stream.
    ///
    /// Errors up to and including the response status are returned here.
    /// Errors while reading the body arrive through the stream.
    pub async fn get(&self, request: &GetRequest) -> Result<ItemStream> {
        let result = self.try_get(request).await;
        self.report(Endpoint::Get, result)
    }

    /// Closes the session. In-flight exchanges are cancelled, open streams
    /// end and gate waiters fail. Safe to call more than once.
    pub fn close(&self) {
        if self.gate.close() {
            self.observe(SessionEvent::Closed);
        }
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn login(&self, credentials: &Credentials) -> Result<LoginResult> {
        let url = self.config.login_url.as_str();
        let request = credentials.login_request();
        let (permit, response) = self
            .exchange(Endpoint::Login, url, &request, self.config.timeouts.total)
            .await?;
        let body = self.read_body(Endpoint::Login, url, response).await?;
        drop(permit);
        codec::decode_response(Endpoint::Login, url, &body)
    }

    async fn try_set(&self, request: &SetRequest) -> Result<()> {
        let url = self.config.set_url.as_str();
        request
            .validate()
            .map_err(|err| codec::invalid(Endpoint::Set, url, err))?;
        let (permit, response) = self
            .exchange(Endpoint::Set, url, request, self.config.timeouts.total)
            .await?;
        // Drained so the connection returns to the pool.
        self.read_body(Endpoint::Set, url, response).await?;
        drop(permit);
        Ok(())
    }

    async fn try_get(&self, request: &GetRequest) -> Result<ItemStream> {
        let url = self.config.get_url.as_str();
        request
            .validate()
            .map_err(|err| codec::invalid(Endpoint::Get, url, err))?;

        let streaming = request.mode == Mode::Stream;
        let timeout = if streaming {
            None
        } else {
            self.config.timeouts.total
        };
        let (permit, response) = self.exchange(Endpoint::Get, url, request, timeout).await?;

        Ok(ItemStream::new(StreamParts {
            url: url.to_string(),
            body: response.body,
            framing: Framing::for_mode(request.mode),
            permit: streaming.then_some(permit),
            gate: self.gate.clone(),
            policy: self.chunk_policy,
            observer: Arc::clone(&self.observer),
        }))
    }

    /// Sends one request under a gate permit and checks the status.
    ///
    /// Returns the permit with a 200 response; any other status is turned
    /// into an error after the (bounded) error body is read.
    async fn exchange<B: Serialize>(
        &self,
        endpoint: Endpoint,
        url: &str,
        request: &B,
        timeout: Option<Duration>,
    ) -> Result<(GatePermit, HttpResponse)> {
        let body = codec::encode_request(endpoint, url, request)?;
        let transport = self.transport(url)?;
        let permit = self.gate.acquire().await.map_err(|err| err.with_url(url))?;

        let bytes = body.len();
        let request = HttpRequest {
            url: url.to_string(),
            body,
            timeout,
        };
        self.observe(SessionEvent::RequestSent {
            endpoint,
            url,
            bytes,
        });

        let response = match self.until_closed(url, transport.post(request)).await? {
            Ok(response) => response,
            Err(err) => return Err(self.transport_failed(endpoint, url, err)),
        };
        if response.status == 200 {
            return Ok((permit, response));
        }

        let status = response.status;
        let error_body = if codec::has_error_body(status) {
            Some(self.read_body(endpoint, url, response).await?)
        } else {
            None
        };
        Err(codec::rejection(endpoint, url, status, error_body.as_deref()))
    }

    async fn read_body(&self, endpoint: Endpoint, url: &str, response: HttpResponse) -> Result<bytes::Bytes> {
        self.until_closed(url, response.read_to_end(MAX_SERIALIZED_JSON_SIZE))
            .await?
            .map_err(|err| self.transport_failed(endpoint, url, err))
    }

    /// Runs `fut` unless the session is closed first.
    async fn until_closed<F: Future>(&self, url: &str, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.gate.cancelled() => Err(ProtocolError::closed("Session is closed").with_url(url)),
            output = fut => Ok(output),
        }
    }

    fn transport(&self, url: &str) -> Result<Arc<T>> {
        if self.gate.is_closed() {
            return Err(ProtocolError::closed("Session is closed").with_url(url));
        }
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ProtocolError::closed("Session is closed").with_url(url))
    }

    fn transport_failed(
        &self,
        endpoint: Endpoint,
        url: &str,
        err: crate::transport::TransportError,
    ) -> ProtocolError {
        let err = codec::transport_failure(endpoint, url, err);
        self.close();
        err
    }

    fn report<R>(&self, endpoint: Endpoint, result: Result<R>) -> Result<R> {
        if let Err(error) = &result {
            self.observe(SessionEvent::Failed { endpoint, error });
        }
        result
    }

    fn observe(&self, event: SessionEvent<'_>) {
        self.observer.on_event(&event);
    }
}

impl<T: HttpTransport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: HttpTransport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("login", &self.login)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
