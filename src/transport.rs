//! The transport collaborator surface.
//!
//! The codec never owns a socket. It sits on top of a bidirectional byte
//! connection managed by the proxy's network layer: received bytes are pushed
//! up through [`ByteFrame`]s, and outbound messages are handed down through
//! [`Connection::write`].

use std::io;
use std::net::SocketAddr;

use bytes::{Buf, Bytes};

/// How pending write buffers are treated when closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Drop whatever is buffered and close immediately.
    NoFlush,
    /// Flush buffered writes before closing.
    FlushWrite,
}

/// Which side decided to close the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseSource {
    LocalClose,
    RemoteClose,
}

/// A bidirectional byte connection owned by the proxy's network layer.
///
/// `write` enqueues bytes on the transport's own write path and must not
/// block; the transport owns flushing and write backpressure.
pub trait Connection: Send + Sync + 'static {
    fn write(&self, buf: Bytes) -> io::Result<()>;

    fn close(&self, flush: FlushPolicy, source: CloseSource);

    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// A drainable view over bytes delivered by the transport.
///
/// The backing storage is refcounted (`Bytes`), so a frame is cheap to hand
/// across tasks. `drain` advances the read cursor; the codec never retains a
/// frame past one rendezvous round-trip.
#[derive(Debug, Clone)]
pub struct ByteFrame {
    data: Bytes,
}

impl ByteFrame {
    pub fn new(data: Bytes) -> ByteFrame {
        ByteFrame { data }
    }

    /// The bytes not yet drained.
    pub fn bytes(&self) -> &[u8] {
        self.data.chunk()
    }

    /// Advance the read cursor by `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` is greater than `len()`.
    pub fn drain(&mut self, n: usize) {
        self.data.advance(n);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Bytes> for ByteFrame {
    fn from(data: Bytes) -> ByteFrame {
        ByteFrame::new(data)
    }
}

impl From<&'static [u8]> for ByteFrame {
    fn from(data: &'static [u8]) -> ByteFrame {
        ByteFrame::new(Bytes::from_static(data))
    }
}
