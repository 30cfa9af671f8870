//! Incremental item delivery for get responses.
//!
//! An `ItemStream` owns the response body, the chunk decoder and (for
//! stream mode) the gate permit of its exchange. Items are yielded as soon
//! as their chunk is decoded; nothing beyond the current chunk is buffered.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream};
use futures::StreamExt;

use xrtc_common::{Endpoint, Item, ProtocolError, Result};

use crate::codec::{self, ChunkDecoder, ChunkError, ChunkPolicy, Framing};
use crate::gate::{Gate, GatePermit};
use crate::observer::{SessionEvent, SessionObserver};
use crate::transport::{BodyStream, TransportError};

/// Items of one get, in server order.
///
/// Ends with `None` when the body ends, after the first error under
/// `ChunkPolicy::Abort`, or when the owning session is closed. Dropping
/// the stream releases its connection and permit.
pub struct ItemStream {
    inner: BoxStream<'static, Result<Item>>,
}

pub(crate) struct StreamParts {
    pub url: String,
    pub body: BodyStream,
    pub framing: Framing,
    pub permit: Option<GatePermit>,
    pub gate: Gate,
    pub policy: ChunkPolicy,
    pub observer: Arc<dyn SessionObserver>,
}

impl ItemStream {
    pub(crate) fn new(parts: StreamParts) -> Self {
        let state = StreamState {
            url: parts.url,
            body: Some(parts.body),
            decoder: ChunkDecoder::new(parts.framing),
            pending: VecDeque::new(),
            permit: parts.permit,
            gate: parts.gate,
            policy: parts.policy,
            observer: parts.observer,
            done: false,
        };
        let inner = stream::unfold(state, |mut state| async move {
            state.next_item().await.map(|next| (next, state))
        })
        .boxed();
        ItemStream { inner }
    }
}

impl Stream for ItemStream {
    type Item = Result<Item>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ItemStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemStream").finish_non_exhaustive()
    }
}

enum Read {
    Cancelled,
    Body(Option<std::result::Result<Bytes, TransportError>>),
}

struct StreamState {
    url: String,
    body: Option<BodyStream>,
    decoder: ChunkDecoder,
    pending: VecDeque<Item>,
    permit: Option<GatePermit>,
    gate: Gate,
    policy: ChunkPolicy,
    observer: Arc<dyn SessionObserver>,
    done: bool,
}

impl StreamState {
    async fn next_item(&mut self) -> Option<Result<Item>> {
        loop {
            if self.gate.is_closed() {
                self.finish();
                return None;
            }
            if let Some(item) = self.pending.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            if let Some(chunk) = self.decoder.next_chunk() {
                if let Some(err) = self.accept(chunk) {
                    return Some(Err(err));
                }
                continue;
            }

            let Some(body) = self.body.as_mut() else {
                self.finish();
                return None;
            };
            let read = tokio::select! {
                biased;
                _ = self.gate.cancelled() => Read::Cancelled,
                next = body.next() => Read::Body(next),
            };

            match read {
                Read::Cancelled => {
                    self.finish();
                    return None;
                }
                Read::Body(Some(Ok(data))) => self.decoder.push(&data),
                Read::Body(Some(Err(err))) => {
                    let err = codec::transport_failure(Endpoint::Get, &self.url, err);
                    if self.gate.close() {
                        self.observer.on_event(&SessionEvent::Closed);
                    }
                    return Some(Err(self.fail(err)));
                }
                Read::Body(None) => {
                    self.body = None;
                    if let Some(chunk) = self.decoder.finish() {
                        if let Some(err) = self.accept(chunk) {
                            return Some(Err(err));
                        }
                    }
                }
            }
        }
    }

    /// Decodes one chunk. Returns the error that ends the stream, if any.
    fn accept(&mut self, chunk: std::result::Result<Bytes, ChunkError>) -> Option<ProtocolError> {
        match chunk.and_then(|chunk| codec::decode_batch(&chunk)) {
            Ok(items) => {
                self.observer.on_event(&SessionEvent::ChunkDecoded {
                    url: &self.url,
                    items: items.len(),
                });
                self.pending.extend(items);
                None
            }
            Err(err) => {
                let err = err.into_protocol_error(&self.url);
                match self.policy {
                    ChunkPolicy::Skip => {
                        self.observer
                            .on_event(&SessionEvent::ChunkSkipped { error: &err });
                        None
                    }
                    ChunkPolicy::Abort => Some(self.fail(err)),
                }
            }
        }
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.finish();
        self.observer.on_event(&SessionEvent::Failed {
            endpoint: Endpoint::Get,
            error: &err,
        });
        err
    }

    fn finish(&mut self) {
        self.done = true;
        self.pending.clear();
        self.body = None;
        self.permit = None;
    }
}
