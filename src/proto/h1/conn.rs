use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, debug_span, error, trace};

use super::factory::H1Settings;
use super::io::Buffered;
use super::rendezvous::{rendezvous, Dispatcher, Reader, Rendezvous};
use super::stream::{ClientStream, ServerStream};
use super::translate;
use crate::registry::{ProtocolId, StreamConnection};
use crate::stream::{
    ServerStreamListener, StreamId, StreamReceiveListener, StreamResetReason, StreamSender,
};
use crate::transport::{ByteFrame, CloseSource, Connection, FlushPolicy};
use crate::{Error, Result};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by both connection roles: the transport below, the
/// rendezvous feeding the parser task, and the single active-stream slot.
pub(crate) struct ConnBase {
    id: u64,
    transport: Arc<dyn Connection>,
    rendezvous: Arc<Rendezvous>,
    dispatcher: AsyncMutex<Dispatcher>,
    active: RwLock<Option<ActiveStream>>,
    settings: H1Settings,
}

#[derive(Clone)]
enum ActiveStream {
    Client(Arc<ClientStream>),
    Server(Arc<ServerStream>),
}

impl ActiveStream {
    fn id(&self) -> StreamId {
        match self {
            ActiveStream::Client(stream) => stream.id(),
            ActiveStream::Server(stream) => stream.id(),
        }
    }

    fn handle_reset(&self, reason: StreamResetReason) {
        match self {
            ActiveStream::Client(stream) => stream.handle_reset(reason),
            ActiveStream::Server(stream) => stream.handle_reset(reason),
        }
    }
}

impl ConnBase {
    fn new(transport: Arc<dyn Connection>, settings: H1Settings) -> (Arc<ConnBase>, Reader) {
        let (dispatcher, reader, shared) = rendezvous();
        let base = Arc::new(ConnBase {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            rendezvous: shared,
            dispatcher: AsyncMutex::new(dispatcher),
            active: RwLock::new(None),
            settings,
        });
        (base, reader)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Connection> {
        &self.transport
    }

    pub(crate) fn remote_addr(&self) -> Option<SocketAddr> {
        self.transport.remote_addr()
    }

    /// Feeds received bytes to the parser, returning once they are consumed.
    async fn dispatch(&self, frame: ByteFrame) -> Result<()> {
        // One producer by contract; the lock is never contended.
        self.dispatcher.lock().await.dispatch(frame).await
    }

    /// Tears the codec down by closing the rendezvous; the parser task exits
    /// through its blocking read.
    fn reset(&self) {
        self.rendezvous.close();
        self.reset_active(StreamResetReason::ConnectionTermination);
    }

    fn active_streams(&self) -> usize {
        let active = self.active.read().expect("active lock poisoned");
        usize::from(active.is_some())
    }

    fn publish(&self, stream: ActiveStream) {
        let mut active = self.active.write().expect("active lock poisoned");
        debug_assert!(active.is_none(), "one stream per http/1 connection");
        *active = Some(stream);
    }

    fn active_stream(&self) -> Option<ActiveStream> {
        self.active.read().expect("active lock poisoned").clone()
    }

    /// Empties the slot if `id` still owns it; a finished stream must not
    /// evict its successor.
    pub(crate) fn clear_active_matching(&self, id: StreamId) {
        let mut active = self.active.write().expect("active lock poisoned");
        if active.as_ref().map(ActiveStream::id) == Some(id) {
            *active = None;
        }
    }

    fn reset_active(&self, reason: StreamResetReason) {
        let stream = self
            .active
            .write()
            .expect("active lock poisoned")
            .take();
        if let Some(stream) = stream {
            debug!(conn_id = self.id, stream_id = stream.id(), ?reason, "resetting stream");
            stream.handle_reset(reason);
        }
    }
}

/// The parser side of each role. One task per connection runs the serve
/// loop; on panic the loop is restarted exactly once before the connection
/// is torn down.
trait ServeLoop: Send + Sync + Sized + 'static {
    fn base(&self) -> &ConnBase;

    fn serve(&self, io: &mut Buffered) -> impl Future<Output = Result<()>> + Send;
}

fn spawn_parser<C: ServeLoop>(conn: Arc<C>, reader: Reader) {
    tokio::spawn(async move {
        let settings = conn.base().settings.clone();
        let mut io = Buffered::new(
            reader,
            settings.max_buf_size_value(),
            settings.max_headers_value(),
        );
        let mut restarted = false;
        loop {
            match AssertUnwindSafe(conn.serve(&mut io)).catch_unwind().await {
                Ok(Ok(())) => {
                    trace!(conn_id = conn.base().id(), "parser task done");
                }
                Ok(Err(err)) => {
                    debug!(conn_id = conn.base().id(), error = %err, "parser task failed");
                    // The connection closes through the transport layer;
                    // the codec only resets what it owns.
                    conn.base().reset_active(StreamResetReason::RemoteReset);
                }
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                        .unwrap_or("non-string panic");
                    error!(conn_id = conn.base().id(), panic = msg, "parser task panicked");
                    // Whatever was in flight when the panic hit is lost;
                    // release it before the loop runs again.
                    conn.base().reset_active(StreamResetReason::LocalReset);
                    if !restarted {
                        restarted = true;
                        continue;
                    }
                }
            }
            break;
        }
    });
}

/// Client-role endpoint of one transport connection.
///
/// Must be created from within a tokio runtime; construction spawns the
/// parser task.
pub struct ClientStreamConnection {
    base: Arc<ConnBase>,
}

impl fmt::Debug for ClientStreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStreamConnection")
            .field("conn_id", &self.base.id)
            .finish()
    }
}

impl ClientStreamConnection {
    pub fn new(transport: Arc<dyn Connection>, settings: H1Settings) -> Arc<ClientStreamConnection> {
        let (base, reader) = ConnBase::new(transport, settings);
        let conn = Arc::new(ClientStreamConnection { base });
        spawn_parser(conn.clone(), reader);
        conn
    }

    /// Opens the next request/response exchange on this connection. Fails
    /// with `StreamBusy` while another exchange is still in flight.
    pub fn new_stream(
        &self,
        receiver: Arc<dyn StreamReceiveListener>,
    ) -> Result<Arc<ClientStream>> {
        let mut active = self
            .base
            .active
            .write()
            .expect("active lock poisoned");
        if active.is_some() {
            return Err(Error::new_stream_busy());
        }
        let stream = ClientStream::new(&self.base, receiver);
        *active = Some(ActiveStream::Client(stream.clone()));
        Ok(stream)
    }

    fn active_client(&self) -> Option<Arc<ClientStream>> {
        match self.base.active_stream() {
            Some(ActiveStream::Client(stream)) => Some(stream),
            _ => None,
        }
    }
}

impl ServeLoop for ClientStreamConnection {
    fn base(&self) -> &ConnBase {
        &self.base
    }

    async fn serve(&self, io: &mut Buffered) -> Result<()> {
        loop {
            let req_method = || self.active_client().and_then(|s| s.request_method());
            let (head, mut decoder) = match io.read_response_head(req_method).await? {
                Some(msg) => msg,
                None => return Ok(()),
            };
            let body = decoder.read_to_end(io).await.map_err(Error::new_io)?;

            let mark_close = translate::wants_close(&head) || decoder.is_close_delimited();

            match self.active_client() {
                Some(stream) => stream.handle_response(head, body),
                None => {
                    debug!(conn_id = self.base.id(), "response without a stream");
                    return Err(Error::new_unexpected_message());
                }
            }

            if mark_close {
                trace!(conn_id = self.base.id(), "connection done after response");
                self.base
                    .transport()
                    .close(FlushPolicy::NoFlush, CloseSource::LocalClose);
                return Ok(());
            }
        }
    }
}

impl StreamConnection for ClientStreamConnection {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::HTTP1
    }

    fn dispatch(&self, frame: ByteFrame) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.base.dispatch(frame))
    }

    fn reset(&self) {
        self.base.reset();
    }

    fn active_streams(&self) -> usize {
        self.base.active_streams()
    }
}

impl crate::registry::ClientConnection for ClientStreamConnection {
    fn new_stream(
        &self,
        receiver: Arc<dyn StreamReceiveListener>,
    ) -> Result<Arc<dyn StreamSender>> {
        ClientStreamConnection::new_stream(self, receiver).map(|s| s as Arc<dyn StreamSender>)
    }
}

/// Server-role endpoint of one transport connection.
///
/// Must be created from within a tokio runtime; construction spawns the
/// parser task.
pub struct ServerStreamConnection {
    base: Arc<ConnBase>,
    listener: Arc<dyn ServerStreamListener>,
}

impl fmt::Debug for ServerStreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerStreamConnection")
            .field("conn_id", &self.base.id)
            .finish()
    }
}

impl ServerStreamConnection {
    pub fn new(
        transport: Arc<dyn Connection>,
        listener: Arc<dyn ServerStreamListener>,
        settings: H1Settings,
    ) -> Arc<ServerStreamConnection> {
        let (base, reader) = ConnBase::new(transport, settings);
        let conn = Arc::new(ServerStreamConnection { base, listener });
        spawn_parser(conn.clone(), reader);
        conn
    }
}

impl ServeLoop for ServerStreamConnection {
    fn base(&self) -> &ConnBase {
        &self.base
    }

    async fn serve(&self, io: &mut Buffered) -> Result<()> {
        loop {
            let (head, mut decoder) = match io.read_request_head().await? {
                Some(msg) => msg,
                None => return Ok(()),
            };
            let body = decoder.read_to_end(io).await.map_err(Error::new_io)?;

            let stream = ServerStream::new(&self.base, head);
            let span = debug_span!(
                "h1_stream",
                conn_id = self.base.id(),
                stream_id = stream.id(),
            );
            let receiver = self.listener.new_stream_detect(
                stream.context(),
                stream.clone() as Arc<dyn StreamSender>,
                span,
            );
            stream.set_receiver(receiver);
            self.base.publish(ActiveStream::Server(stream.clone()));

            stream.handle_request(body);

            // No pipelining: the next head is not parsed until this
            // response has been written to the wire.
            stream.wait_done().await;
        }
    }
}

impl StreamConnection for ServerStreamConnection {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::HTTP1
    }

    fn dispatch(&self, frame: ByteFrame) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.base.dispatch(frame))
    }

    fn reset(&self) {
        self.base.reset();
    }

    fn active_streams(&self) -> usize {
        self.base.active_streams()
    }
}
