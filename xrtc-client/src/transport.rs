//! # HTTP Transport
//!
//! Purpose: Isolate the one I/O capability the protocol engine needs, a
//! JSON POST whose response body arrives as a stream of byte chunks, behind
//! a small trait.
//!
//! ## Design Principles
//! 1. **Narrow Seam**: Sessions only see `HttpTransport::post`; connection
//!    pooling, TLS and timeouts stay inside the implementation.
//! 2. **Streaming Bodies**: Responses expose the body as a stream so stream
//!    mode can decode incrementally.
//! 3. **Owned Futures**: Returned futures and body streams own their data,
//!    so a body can outlive the call that produced it.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, info};

use xrtc_common::{BoxError, ProtocolError, Result};

use crate::config::ConnectionConfig;

/// Failure below the HTTP status level (DNS, TLS, timeout, reset).
#[derive(Debug, Error)]
#[error("HTTP request failed: {0}")]
pub struct TransportError(#[source] BoxError);

impl TransportError {
    pub fn new(cause: impl Into<BoxError>) -> Self {
        TransportError(cause.into())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError(Box::new(err))
    }
}

/// One outbound POST.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub body: Vec<u8>,
    /// Budget for the whole exchange including the body; `None` leaves only
    /// the transport's connect/read timeouts in force.
    pub timeout: Option<Duration>,
}

/// Body chunks as they arrive from the network.
pub type BodyStream = BoxStream<'static, std::result::Result<Bytes, TransportError>>;

/// Status plus streaming body.
pub struct HttpResponse {
    pub status: u16,
    pub body: BodyStream,
}

impl HttpResponse {
    pub fn new(status: u16, body: BodyStream) -> Self {
        HttpResponse { status, body }
    }

    /// Response whose body is already fully available.
    pub fn full(status: u16, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let chunks = if body.is_empty() { Vec::new() } else { vec![Ok(body)] };
        HttpResponse::new(status, stream::iter(chunks).boxed())
    }

    /// Reads the body, stopping once more than `limit` bytes are buffered.
    ///
    /// The returned buffer exceeds `limit` exactly when the body did.
    pub async fn read_to_end(mut self, limit: usize) -> std::result::Result<Bytes, TransportError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.try_next().await? {
            buf.extend_from_slice(&chunk);
            if buf.len() > limit {
                break;
            }
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// A minimal async HTTP client for JSON POST requests.
///
/// Implementations must be shareable across concurrently running
/// operations of one session.
pub trait HttpTransport: Send + Sync + 'static {
    fn post(&self, request: HttpRequest) -> BoxFuture<'_, std::result::Result<HttpResponse, TransportError>>;
}

/// [`reqwest`]-backed transport with rustls and a pooled connector.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the client from the resolved connection configuration.
    ///
    /// # Errors
    /// Returns a `Configuration` error if an extra root certificate cannot
    /// be read or parsed, or the TLS backend fails to initialise.
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(concat!("xrtc-client/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.timeouts.connect)
            .read_timeout(config.timeouts.read)
            .pool_max_idle_per_host(config.limits.connections);

        for path in &config.tls.extra_root_certificates {
            let pem = std::fs::read(path).map_err(|err| {
                ProtocolError::configuration(format!(
                    "Cannot read root certificate {}",
                    path.display()
                ))
                .with_source(err)
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|err| {
                ProtocolError::configuration(format!(
                    "Invalid root certificate {}",
                    path.display()
                ))
                .with_source(err)
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if !config.tls.extra_root_certificates.is_empty() {
            info!(
                count = config.tls.extra_root_certificates.len(),
                "loaded extra root certificates"
            );
        }

        let client = builder.build().map_err(|err| {
            ProtocolError::configuration("Failed to build HTTP client").with_source(err)
        })?;
        Ok(ReqwestTransport { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post(&self, request: HttpRequest) -> BoxFuture<'_, std::result::Result<HttpResponse, TransportError>> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            debug!(status, url = %response.url(), "response headers received");
            let body = response.bytes_stream().map_err(TransportError::from).boxed();
            Ok(HttpResponse::new(status, body))
        }
        .boxed()
    }
}
