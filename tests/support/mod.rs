#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::header::HeaderValue;
use http::HeaderMap;
use tokio::sync::mpsc;

use weft_h1::headers::{INTERNAL_PATH, INTERNAL_STATUS};
use weft_h1::{
    CloseSource, Connection, FlushPolicy, HeaderFrame, ResponseHeader, ServerStreamListener,
    StreamContext, StreamReceiveListener, StreamResetReason, StreamSender,
};

/// Shared ordered log of interesting moments, for cross-task ordering
/// assertions.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> EventLog {
        EventLog::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Transport double: records written bytes and close calls.
pub struct MockConnection {
    wire: Mutex<Vec<u8>>,
    closed: Mutex<Option<(FlushPolicy, CloseSource)>>,
    remote: Option<SocketAddr>,
    log: Option<EventLog>,
}

impl MockConnection {
    pub fn new() -> Arc<MockConnection> {
        Arc::new(MockConnection {
            wire: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
            remote: Some("127.0.0.1:18080".parse().unwrap()),
            log: None,
        })
    }

    pub fn with_log(log: EventLog) -> Arc<MockConnection> {
        Arc::new(MockConnection {
            wire: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
            remote: Some("127.0.0.1:18080".parse().unwrap()),
            log: Some(log),
        })
    }

    pub fn written(&self) -> Vec<u8> {
        self.wire.lock().unwrap().clone()
    }

    pub fn written_utf8(&self) -> String {
        String::from_utf8(self.written()).expect("wire bytes were not utf8")
    }

    pub fn close_call(&self) -> Option<(FlushPolicy, CloseSource)> {
        *self.closed.lock().unwrap()
    }
}

impl Connection for MockConnection {
    fn write(&self, buf: Bytes) -> io::Result<()> {
        if let Some(ref log) = self.log {
            log.push("write");
        }
        self.wire.lock().unwrap().extend_from_slice(&buf);
        Ok(())
    }

    fn close(&self, flush: FlushPolicy, source: CloseSource) {
        let mut closed = self.closed.lock().unwrap();
        if closed.is_none() {
            *closed = Some((flush, source));
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }
}

/// What a recording receiver observed, in callback order.
#[derive(Debug)]
pub enum Event {
    Headers {
        headers: HeaderMap,
        end_stream: bool,
    },
    Data {
        bytes: Bytes,
        end_stream: bool,
    },
    Trailers,
    Reset(StreamResetReason),
    Destroy,
}

pub struct RecordingReceiver {
    tx: mpsc::UnboundedSender<Event>,
}

pub fn recording_receiver() -> (Arc<RecordingReceiver>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingReceiver { tx }), rx)
}

impl StreamReceiveListener for RecordingReceiver {
    fn on_receive_headers(&self, _ctx: &StreamContext, headers: HeaderFrame, end_stream: bool) {
        let _ = self.tx.send(Event::Headers {
            headers: headers.headers().clone(),
            end_stream,
        });
    }

    fn on_receive_data(&self, _ctx: &StreamContext, data: Bytes, end_stream: bool) {
        let _ = self.tx.send(Event::Data {
            bytes: data,
            end_stream,
        });
    }

    fn on_receive_trailers(&self, _ctx: &StreamContext, _trailers: HeaderMap) {
        let _ = self.tx.send(Event::Trailers);
    }

    fn on_reset(&self, _ctx: &StreamContext, reason: StreamResetReason) {
        let _ = self.tx.send(Event::Reset(reason));
    }

    fn on_destroy(&self, _ctx: &StreamContext) {
        let _ = self.tx.send(Event::Destroy);
    }
}

/// Server-side listener that records callbacks and parks each stream's
/// sender for the test to answer manually.
pub struct RecordingListener {
    tx: mpsc::UnboundedSender<Event>,
    sender_slot: Mutex<Option<Arc<dyn StreamSender>>>,
}

pub fn recording_listener() -> (Arc<RecordingListener>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(RecordingListener {
            tx,
            sender_slot: Mutex::new(None),
        }),
        rx,
    )
}

impl RecordingListener {
    pub fn sender(&self) -> Arc<dyn StreamSender> {
        self.sender_slot
            .lock()
            .unwrap()
            .clone()
            .expect("no stream detected yet")
    }
}

impl ServerStreamListener for RecordingListener {
    fn new_stream_detect(
        &self,
        _ctx: &StreamContext,
        sender: Arc<dyn StreamSender>,
        _span: tracing::Span,
    ) -> Arc<dyn StreamReceiveListener> {
        *self.sender_slot.lock().unwrap() = Some(sender);
        Arc::new(RecordingReceiver {
            tx: self.tx.clone(),
        })
    }
}

/// Server-side listener that answers every request itself, optionally
/// after a delay, hijack-style.
pub struct EchoListener {
    pub status: u16,
    pub body: &'static [u8],
    pub delay: Option<Duration>,
    pub log: EventLog,
}

impl EchoListener {
    pub fn new(status: u16, body: &'static [u8], delay: Option<Duration>, log: EventLog) -> Arc<EchoListener> {
        Arc::new(EchoListener {
            status,
            body,
            delay,
            log,
        })
    }
}

impl ServerStreamListener for EchoListener {
    fn new_stream_detect(
        &self,
        _ctx: &StreamContext,
        sender: Arc<dyn StreamSender>,
        _span: tracing::Span,
    ) -> Arc<dyn StreamReceiveListener> {
        Arc::new(EchoReceiver {
            sender,
            status: self.status,
            body: self.body,
            delay: self.delay,
            log: self.log.clone(),
        })
    }
}

struct EchoReceiver {
    sender: Arc<dyn StreamSender>,
    status: u16,
    body: &'static [u8],
    delay: Option<Duration>,
    log: EventLog,
}

impl EchoReceiver {
    fn respond(&self) {
        let sender = self.sender.clone();
        let status = self.status;
        let body = self.body;
        match self.delay {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    send_response(&*sender, status, body);
                });
            }
            None => send_response(&*self.sender, status, body),
        }
    }
}

impl StreamReceiveListener for EchoReceiver {
    fn on_receive_headers(&self, _ctx: &StreamContext, headers: HeaderFrame, end_stream: bool) {
        let path = headers
            .headers()
            .get(&INTERNAL_PATH)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_owned();
        self.log.push(format!("recv {}", path));
        if end_stream {
            self.respond();
        }
    }

    fn on_receive_data(&self, _ctx: &StreamContext, _data: Bytes, end_stream: bool) {
        if end_stream {
            self.respond();
        }
    }
}

/// Drives a response through a server stream's sender.
pub fn send_response(sender: &dyn StreamSender, status: u16, body: &'static [u8]) {
    let mut headers = HeaderMap::new();
    headers.insert(INTERNAL_STATUS, HeaderValue::from(status));
    sender
        .append_headers(
            HeaderFrame::Response(ResponseHeader::new(headers)),
            body.is_empty(),
        )
        .expect("append_headers");
    if !body.is_empty() {
        sender
            .append_data(Bytes::from_static(body), true)
            .expect("append_data");
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("event channel closed")
}

pub async fn assert_no_event(rx: &mut mpsc::UnboundedReceiver<Event>) {
    let quiet = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(quiet.is_err(), "unexpected event: {:?}", quiet);
}
