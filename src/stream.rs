//! The proxy stream-layer contracts.
//!
//! A stream is one request/response pair, uniform across wire protocols.
//! The codec delivers inbound messages through a [`StreamReceiveListener`]
//! and accepts outbound messages through a [`StreamSender`]; both sides see
//! headers only as a map, with request-line and status information carried
//! by the reserved internal keys (see [`crate::headers`]).

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use tracing::Span;

use crate::headers::HeaderFrame;

/// Process-local monotonic stream identifier.
pub type StreamId = u64;

/// Per-stream context, propagated across task boundaries into every
/// listener callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamContext {
    conn_id: u64,
    stream_id: StreamId,
}

impl StreamContext {
    pub(crate) fn new(conn_id: u64) -> StreamContext {
        StreamContext {
            conn_id,
            stream_id: 0,
        }
    }

    pub(crate) fn with_stream(mut self, stream_id: StreamId) -> StreamContext {
        self.stream_id = stream_id;
        self
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}

/// Why a stream was torn down before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamResetReason {
    /// The peer closed or failed the underlying connection.
    RemoteReset,
    /// This process tore the stream down.
    LocalReset,
    /// The whole connection is being terminated.
    ConnectionTermination,
}

/// Receives one stream's inbound message, callback by callback.
///
/// Calls for a single stream are strictly ordered: `on_receive_headers`
/// first, then `on_receive_data`; end-of-stream is signalled on the last
/// callback only, after which no further callback is delivered.
pub trait StreamReceiveListener: Send + Sync + 'static {
    fn on_receive_headers(&self, ctx: &StreamContext, headers: HeaderFrame, end_stream: bool);

    fn on_receive_data(&self, ctx: &StreamContext, data: Bytes, end_stream: bool);

    fn on_receive_trailers(&self, ctx: &StreamContext, trailers: HeaderMap) {
        let _ = (ctx, trailers);
    }

    fn on_reset(&self, ctx: &StreamContext, reason: StreamResetReason) {
        let _ = (ctx, reason);
    }

    fn on_destroy(&self, ctx: &StreamContext) {
        let _ = ctx;
    }
}

/// The outbound half of a stream, handed to the proxy.
///
/// `append_headers` with `end_stream == true` sends a headers-only message;
/// otherwise `append_data`/`append_trailers` complete it. For HTTP/1 the
/// message goes to the wire once the end of the stream is appended.
pub trait StreamSender: Send + Sync + 'static {
    fn id(&self) -> StreamId;

    fn append_headers(&self, headers: HeaderFrame, end_stream: bool) -> crate::Result<()>;

    fn append_data(&self, data: Bytes, end_stream: bool) -> crate::Result<()>;

    fn append_trailers(&self, trailers: HeaderMap) -> crate::Result<()>;

    /// Application-level pause. `true` increments the disable count, `false`
    /// decrements it; a transition to non-positive delivers any message that
    /// was parsed while paused.
    fn read_disable(&self, disable: bool);

    fn reset(&self, reason: StreamResetReason);
}

/// Connection-level listener supplied by the proxy for server connections.
pub trait ServerStreamListener: Send + Sync + 'static {
    /// Invoked when the codec has parsed a new request head. Returns the
    /// receive listener for the stream's callbacks. `span` scopes the
    /// stream's handling for tracing.
    fn new_stream_detect(
        &self,
        ctx: &StreamContext,
        sender: Arc<dyn StreamSender>,
        span: Span,
    ) -> Arc<dyn StreamReceiveListener>;
}
