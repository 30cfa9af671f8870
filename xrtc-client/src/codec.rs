//! # Request Encoding and Response Decoding
//!
//! Purpose: The sans-I/O half of the protocol engine. Everything here works
//! on byte slices, so the async session and the blocking adapter share it
//! unchanged.
//!
//! ## Design Principles
//! 1. **Check Before Send**: Requests are validated and measured against the
//!    API ceiling before any network activity.
//! 2. **Chunk-at-a-Time**: The decoder holds at most one chunk (plus the tail
//!    of the last network read) and never more than the ceiling.
//! 3. **Explicit Outcomes**: Per-chunk failures are values (`ChunkError`);
//!    the caller's `ChunkPolicy` decides whether they abort or are skipped.

use bytes::{Buf, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use xrtc_common::{
    Endpoint, ErrorKind, Item, Mode, ProtocolError, ReceivedBatch, ServerError,
    MAX_SERIALIZED_JSON_SIZE,
};

use crate::transport::TransportError;

/// What to do with a response chunk that is oversized, empty or malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkPolicy {
    /// End the get with the error.
    #[default]
    Abort,
    /// Report the chunk to the observer and keep reading.
    Skip,
}

/// How the response body is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Newline-delimited JSON objects (stream mode).
    Lines,
    /// The whole body is one JSON object (probe and watch).
    Whole,
}

impl Framing {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Stream => Framing::Lines,
            Mode::Probe | Mode::Watch => Framing::Whole,
        }
    }
}

/// Per-chunk protocol violation.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Serialized json response size exceeds API limit")]
    Oversized,
    #[error("Empty response.")]
    Empty,
    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ChunkError {
    pub fn into_protocol_error(self, url: &str) -> ProtocolError {
        let message = format!("{} {}", Endpoint::Get.failure_prefix(), self);
        let err = ProtocolError::new(ErrorKind::Protocol, message).with_url(url);
        match self {
            ChunkError::Malformed(source) => err.with_source(source),
            ChunkError::Oversized | ChunkError::Empty => err,
        }
    }
}

/// Incremental splitter for get response bodies.
#[derive(Debug)]
pub struct ChunkDecoder {
    framing: Framing,
    buffer: BytesMut,
    limit: usize,
    // Set after an oversized chunk: input is dropped until the next
    // newline (Lines) or the end of the body (Whole).
    discarding: bool,
}

impl ChunkDecoder {
    pub fn new(framing: Framing) -> Self {
        Self::with_limit(framing, MAX_SERIALIZED_JSON_SIZE)
    }

    pub fn with_limit(framing: Framing, limit: usize) -> Self {
        ChunkDecoder {
            framing,
            buffer: BytesMut::new(),
            limit,
            discarding: false,
        }
    }

    /// Appends bytes read from the network.
    pub fn push(&mut self, data: &[u8]) {
        if self.discarding && self.framing == Framing::Whole {
            return;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete chunk, or `None` when more input is needed.
    pub fn next_chunk(&mut self) -> Option<Result<Bytes, ChunkError>> {
        match self.framing {
            Framing::Lines => self.next_line(),
            Framing::Whole => {
                if !self.discarding && self.buffer.len() > self.limit {
                    self.discarding = true;
                    self.buffer.clear();
                    return Some(Err(ChunkError::Oversized));
                }
                None
            }
        }
    }

    /// Flushes whatever is buffered once the body has ended.
    pub fn finish(&mut self) -> Option<Result<Bytes, ChunkError>> {
        if self.discarding {
            self.discarding = false;
            self.buffer.clear();
            return None;
        }
        match self.framing {
            Framing::Lines if self.buffer.is_empty() => None,
            Framing::Lines => {
                let tail = self.buffer.split().freeze();
                Some(self.check(trim_cr(tail)))
            }
            Framing::Whole => {
                let body = self.buffer.split().freeze();
                Some(self.check(body))
            }
        }
    }

    fn next_line(&mut self) -> Option<Result<Bytes, ChunkError>> {
        loop {
            let newline = self.buffer.iter().position(|&b| b == b'\n');
            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.buffer.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buffer.clear();
                        return None;
                    }
                }
            }

            // A trailing '\r' may still be followed by its '\n'.
            let partial = self.buffer.len() - usize::from(self.buffer.last() == Some(&b'\r'));
            return match newline {
                Some(pos) => {
                    let mut line = self.buffer.split_to(pos + 1);
                    line.truncate(pos);
                    Some(self.check(trim_cr(line.freeze())))
                }
                None if partial > self.limit => {
                    self.discarding = true;
                    self.buffer.clear();
                    Some(Err(ChunkError::Oversized))
                }
                None => None,
            };
        }
    }

    fn check(&self, chunk: Bytes) -> Result<Bytes, ChunkError> {
        if chunk.len() > self.limit {
            return Err(ChunkError::Oversized);
        }
        if chunk.is_empty() {
            return Err(ChunkError::Empty);
        }
        Ok(chunk)
    }
}

fn trim_cr(chunk: Bytes) -> Bytes {
    match chunk.last() {
        Some(b'\r') => chunk.slice(..chunk.len() - 1),
        _ => chunk,
    }
}

/// Decodes one chunk into its items, in server order.
pub fn decode_batch(chunk: &[u8]) -> Result<Vec<Item>, ChunkError> {
    let batch: ReceivedBatch = serde_json::from_slice(chunk)?;
    Ok(batch.items.unwrap_or_default())
}

/// Serializes a request body and enforces the size ceiling.
pub fn encode_request<T: Serialize>(
    endpoint: Endpoint,
    url: &str,
    request: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(request).map_err(|err| {
        ProtocolError::validation(format!(
            "{} Request serialization failed",
            endpoint.failure_prefix()
        ))
        .with_url(url)
        .with_source(err)
    })?;
    if body.len() > MAX_SERIALIZED_JSON_SIZE {
        return Err(ProtocolError::validation(format!(
            "{} Serialized json request size exceeds API limit",
            endpoint.failure_prefix()
        ))
        .with_url(url));
    }
    Ok(body)
}

/// Decodes a complete (non-streamed) success body.
pub fn decode_response<T: DeserializeOwned>(
    endpoint: Endpoint,
    url: &str,
    body: &[u8],
) -> Result<T, ProtocolError> {
    if body.len() > MAX_SERIALIZED_JSON_SIZE {
        return Err(ProtocolError::new(
            ErrorKind::Protocol,
            format!(
                "{} Serialized json response size exceeds API limit",
                endpoint.failure_prefix()
            ),
        )
        .with_url(url));
    }
    serde_json::from_slice(body).map_err(|err| {
        ProtocolError::new(
            ErrorKind::Protocol,
            format!("{} Malformed response: {}", endpoint.failure_prefix(), err),
        )
        .with_url(url)
        .with_source(err)
    })
}

/// Returns true when a non-200 status carries a structured error body.
pub fn has_error_body(status: u16) -> bool {
    matches!(status, 400 | 401)
}

/// Builds the error for a non-200 response.
///
/// `body` is the (bounded) error body for 400/401; a body that does not
/// carry a message falls back to the numeric status.
pub fn rejection(endpoint: Endpoint, url: &str, status: u16, body: Option<&[u8]>) -> ProtocolError {
    let server_message = body
        .filter(|_| has_error_body(status))
        .and_then(|body| serde_json::from_slice::<ServerError>(body).ok())
        .and_then(|error| error.message().map(str::to_owned));

    let message = match server_message {
        Some(text) => format!("{} {}", endpoint.failure_prefix(), text),
        None => format!("{} Code: {}", endpoint.failure_prefix(), status),
    };
    ProtocolError::new(endpoint.rejection_kind(), message).with_url(url)
}

/// Wraps a transport failure.
pub fn transport_failure(endpoint: Endpoint, url: &str, err: TransportError) -> ProtocolError {
    ProtocolError::new(
        ErrorKind::Transport,
        format!("{} {}", endpoint.failure_prefix(), err),
    )
    .with_url(url)
    .with_source(err)
}

/// Re-tags a local validation failure with the endpoint it was meant for.
pub fn invalid(endpoint: Endpoint, url: &str, err: ProtocolError) -> ProtocolError {
    ProtocolError::validation(format!("{} {}", endpoint.failure_prefix(), err.message()))
        .with_url(url)
}
