use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use bytes::{Bytes, BytesMut};
use http::header::{HeaderValue, CONNECTION};
use http::{HeaderMap, Method, Version};
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::conn::ConnBase;
use super::encode::{encode_request, encode_response};
use super::translate;
use crate::headers::{remove_internal_keys, HeaderFrame};
use crate::proto::{MessageHead, RequestHead, ResponseHead};
use crate::stream::{
    StreamContext, StreamId, StreamReceiveListener, StreamResetReason, StreamSender,
};
use crate::transport::{CloseSource, FlushPolicy};
use crate::{Error, Result};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

fn next_stream_id() -> StreamId {
    NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed)
}

/// The outbound request being assembled by `append_*` calls.
#[derive(Default)]
struct OutboundRequest {
    head: Option<RequestHead>,
    body: BytesMut,
    sent: bool,
}

/// One request/response pair on a client connection.
///
/// The proxy drives the request through the `StreamSender` surface; the
/// connection's parser task pushes the response back through
/// `handle_response`.
pub struct ClientStream {
    id: StreamId,
    ctx: StreamContext,
    conn: Weak<ConnBase>,
    receiver: Arc<dyn StreamReceiveListener>,
    request: Mutex<OutboundRequest>,
    pending_response: Mutex<Option<(ResponseHead, Bytes)>>,
    read_disable_count: AtomicI32,
}

impl ClientStream {
    pub(crate) fn new(
        conn: &Arc<ConnBase>,
        receiver: Arc<dyn StreamReceiveListener>,
    ) -> Arc<ClientStream> {
        let id = next_stream_id();
        Arc::new(ClientStream {
            id,
            ctx: StreamContext::new(conn.id()).with_stream(id),
            conn: Arc::downgrade(conn),
            receiver,
            request: Mutex::new(OutboundRequest::default()),
            pending_response: Mutex::new(None),
            read_disable_count: AtomicI32::new(0),
        })
    }

    pub(crate) fn request_method(&self) -> Option<Method> {
        self.request
            .lock()
            .expect("request lock poisoned")
            .head
            .as_ref()
            .map(|head| head.subject.0.clone())
    }

    /// Binds a parsed response to this stream, deferring delivery while
    /// reads are disabled.
    pub(crate) fn handle_response(&self, head: ResponseHead, body: Bytes) {
        if self.read_disable_count.load(Ordering::Acquire) > 0 {
            trace!(stream_id = self.id, "read disabled, deferring response");
            *self
                .pending_response
                .lock()
                .expect("pending lock poisoned") = Some((head, body));
            return;
        }
        self.deliver_response(head, body);
    }

    fn deliver_response(&self, head: ResponseHead, body: Bytes) {
        let view = translate::ingress_response(&head);
        // The slot empties before callbacks run; a receiver may start the
        // next request on this connection from inside one.
        if let Some(conn) = self.conn.upgrade() {
            conn.clear_active_matching(self.id);
        }
        let end_stream = body.is_empty();
        self.receiver
            .on_receive_headers(&self.ctx, HeaderFrame::Response(view), end_stream);
        if !end_stream {
            self.receiver.on_receive_data(&self.ctx, body, true);
        }
        self.receiver.on_destroy(&self.ctx);
    }

    pub(crate) fn handle_reset(&self, reason: StreamResetReason) {
        self.pending_response
            .lock()
            .expect("pending lock poisoned")
            .take();
        self.receiver.on_reset(&self.ctx, reason);
    }

    fn do_send(&self) -> Result<()> {
        let conn = self.conn.upgrade().ok_or_else(Error::new_closed)?;
        let mut request = self.request.lock().expect("request lock poisoned");
        if request.sent {
            return Ok(());
        }
        if request.head.is_none() {
            // Data arrived without headers; synthesize the default head.
            request.head = Some(translate::egress_request(
                HeaderMap::new(),
                false,
                conn.remote_addr(),
            )?);
        }
        let head = request.head.as_ref().expect("head just ensured");
        let wire = encode_request(head, &request.body);
        request.sent = true;
        request.body = BytesMut::new();
        conn.transport().write(wire.freeze()).map_err(Error::new_io)
    }
}

impl fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStream")
            .field("stream_id", &self.id)
            .finish()
    }
}

impl StreamSender for ClientStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn append_headers(&self, headers: HeaderFrame, end_stream: bool) -> Result<()> {
        let map = match headers {
            HeaderFrame::Request(view) => view.into_headers(),
            HeaderFrame::Response(_) => {
                debug!("response headers appended to a client stream");
                return Err(Error::new_unexpected_message());
            }
        };
        let remote_addr = self.conn.upgrade().and_then(|conn| conn.remote_addr());
        let head = translate::egress_request(map, end_stream, remote_addr)?;
        self.request.lock().expect("request lock poisoned").head = Some(head);
        if end_stream {
            self.do_send()
        } else {
            Ok(())
        }
    }

    fn append_data(&self, data: Bytes, end_stream: bool) -> Result<()> {
        self.request
            .lock()
            .expect("request lock poisoned")
            .body
            .extend_from_slice(&data);
        if end_stream {
            self.do_send()
        } else {
            Ok(())
        }
    }

    fn append_trailers(&self, _trailers: HeaderMap) -> Result<()> {
        // HTTP/1 egress carries no trailers; appending them ends the stream.
        trace!(stream_id = self.id, "dropping trailers on http/1 stream");
        self.do_send()
    }

    fn read_disable(&self, disable: bool) {
        if disable {
            self.read_disable_count.fetch_add(1, Ordering::AcqRel);
        } else {
            let count = self.read_disable_count.fetch_sub(1, Ordering::AcqRel) - 1;
            if count <= 0 {
                let pending = self
                    .pending_response
                    .lock()
                    .expect("pending lock poisoned")
                    .take();
                if let Some((head, body)) = pending {
                    self.deliver_response(head, body);
                }
            }
        }
    }

    fn reset(&self, reason: StreamResetReason) {
        if let Some(conn) = self.conn.upgrade() {
            conn.clear_active_matching(self.id);
        }
        self.handle_reset(reason);
    }
}

/// The outbound response being assembled by `append_*` calls.
#[derive(Default)]
struct OutboundResponse {
    status: u16,
    headers: HeaderMap,
    body: BytesMut,
}

/// One request/response pair on a server connection.
///
/// Holds the single-capacity response-done signal the serve loop blocks on:
/// no second request is parsed until this stream's response hits the wire.
pub struct ServerStream {
    id: StreamId,
    ctx: StreamContext,
    conn: Weak<ConnBase>,
    receiver: OnceLock<Arc<dyn StreamReceiveListener>>,
    request: RequestHead,
    request_wants_close: bool,
    response: Mutex<OutboundResponse>,
    pending_request: Mutex<Option<Bytes>>,
    read_disable_count: AtomicI32,
    done: Notify,
    responded: AtomicBool,
}

impl ServerStream {
    pub(crate) fn new(conn: &Arc<ConnBase>, request: RequestHead) -> Arc<ServerStream> {
        let id = next_stream_id();
        let request_wants_close = translate::wants_close(&request);
        Arc::new(ServerStream {
            id,
            ctx: StreamContext::new(conn.id()).with_stream(id),
            conn: Arc::downgrade(conn),
            receiver: OnceLock::new(),
            request,
            request_wants_close,
            response: Mutex::new(OutboundResponse::default()),
            pending_request: Mutex::new(None),
            read_disable_count: AtomicI32::new(0),
            done: Notify::new(),
            responded: AtomicBool::new(false),
        })
    }

    pub(crate) fn context(&self) -> &StreamContext {
        &self.ctx
    }

    pub(crate) fn set_receiver(&self, receiver: Arc<dyn StreamReceiveListener>) {
        let _ = self.receiver.set(receiver);
    }

    /// Delivers the parsed request to the receiver, deferring while reads
    /// are disabled.
    pub(crate) fn handle_request(&self, body: Bytes) {
        if self.read_disable_count.load(Ordering::Acquire) > 0 {
            trace!(stream_id = self.id, "read disabled, deferring request");
            *self
                .pending_request
                .lock()
                .expect("pending lock poisoned") = Some(body);
            return;
        }
        self.deliver_request(body);
    }

    fn deliver_request(&self, body: Bytes) {
        let receiver = match self.receiver.get() {
            Some(receiver) => receiver.clone(),
            None => return,
        };
        let view = translate::ingress_request(&self.request);
        let end_stream = body.is_empty();
        receiver.on_receive_headers(&self.ctx, HeaderFrame::Request(view), end_stream);
        if !end_stream {
            receiver.on_receive_data(&self.ctx, body, true);
        }
    }

    /// The serve loop parks here between requests; half-duplex ordering
    /// falls out of this one await.
    pub(crate) async fn wait_done(&self) {
        self.done.notified().await;
    }

    pub(crate) fn handle_reset(&self, reason: StreamResetReason) {
        self.pending_request
            .lock()
            .expect("pending lock poisoned")
            .take();
        if let Some(receiver) = self.receiver.get() {
            receiver.on_reset(&self.ctx, reason);
        }
        self.done.notify_one();
    }

    fn end_stream(&self) -> Result<()> {
        if self.responded.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let conn = match self.conn.upgrade() {
            Some(conn) => conn,
            None => {
                self.done.notify_one();
                return Err(Error::new_closed());
            }
        };

        let (mut head, body) = {
            let mut response = self.response.lock().expect("response lock poisoned");
            let head = MessageHead {
                version: Version::HTTP_11,
                subject: response.status,
                headers: mem::take(&mut response.headers),
            };
            (head, mem::take(&mut response.body))
        };

        let mut mark_close = false;
        if self.request_wants_close {
            head.headers
                .insert(CONNECTION, HeaderValue::from_static("close"));
            mark_close = true;
        } else if self.request.version != Version::HTTP_11 {
            // Pre-1.1 peers only reuse the connection when told so.
            head.headers
                .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        let wire = encode_response(&head, &body);
        let result = conn.transport().write(wire.freeze());
        if let Err(ref err) = result {
            debug!(stream_id = self.id, error = %err, "response write failed");
        }
        // The slot must empty before the serve loop wakes, or the next
        // request would find it occupied.
        conn.clear_active_matching(self.id);
        self.done.notify_one();
        if mark_close {
            trace!(stream_id = self.id, "closing connection after response");
            conn.transport()
                .close(FlushPolicy::FlushWrite, CloseSource::LocalClose);
        }
        if let Some(receiver) = self.receiver.get() {
            receiver.on_destroy(&self.ctx);
        }
        result.map_err(Error::new_io)
    }
}

impl fmt::Debug for ServerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerStream")
            .field("stream_id", &self.id)
            .finish()
    }
}

impl StreamSender for ServerStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn append_headers(&self, headers: HeaderFrame, end_stream: bool) -> Result<()> {
        {
            let mut response = self.response.lock().expect("response lock poisoned");
            match headers {
                HeaderFrame::Response(view) => {
                    let mut map = view.into_headers();
                    response.status = translate::take_status(&mut map);
                    response.headers = map;
                }
                HeaderFrame::Request(view) => {
                    // Hijack: the proxy answered from the request headers
                    // without an upstream. Echo them, minus in-process keys.
                    let mut map = view.into_headers();
                    response.status = translate::take_status(&mut map);
                    remove_internal_keys(&mut map);
                    response.headers = map;
                }
            }
        }
        if end_stream {
            self.end_stream()
        } else {
            Ok(())
        }
    }

    fn append_data(&self, data: Bytes, end_stream: bool) -> Result<()> {
        self.response
            .lock()
            .expect("response lock poisoned")
            .body
            .extend_from_slice(&data);
        if end_stream {
            self.end_stream()
        } else {
            Ok(())
        }
    }

    fn append_trailers(&self, _trailers: HeaderMap) -> Result<()> {
        trace!(stream_id = self.id, "dropping trailers on http/1 stream");
        self.end_stream()
    }

    fn read_disable(&self, disable: bool) {
        if disable {
            self.read_disable_count.fetch_add(1, Ordering::AcqRel);
        } else {
            let count = self.read_disable_count.fetch_sub(1, Ordering::AcqRel) - 1;
            if count <= 0 {
                let pending = self
                    .pending_request
                    .lock()
                    .expect("pending lock poisoned")
                    .take();
                if let Some(body) = pending {
                    self.deliver_request(body);
                }
            }
        }
    }

    fn reset(&self, reason: StreamResetReason) {
        if let Some(conn) = self.conn.upgrade() {
            conn.clear_active_matching(self.id);
        }
        self.handle_reset(reason);
    }
}
