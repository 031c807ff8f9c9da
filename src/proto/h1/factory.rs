use std::cmp;
use std::sync::Arc;

use tracing::debug;

use super::conn::{ClientStreamConnection, ServerStreamConnection};
use super::detect;
use crate::proto::{
    DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_HEADERS, MINIMUM_MAX_BUFFER_SIZE,
};
use crate::registry::{
    ClientConnection, MatchResult, ProtocolFactory, ProtocolId, Registry, StreamConnection,
};
use crate::stream::ServerStreamListener;
use crate::transport::Connection;
use crate::{Error, Result};

/// Per-connection knobs, carried by the factory into every connection it
/// builds.
#[derive(Debug, Clone)]
pub struct H1Settings {
    max_buf_size: usize,
    max_headers: usize,
}

impl Default for H1Settings {
    fn default() -> H1Settings {
        H1Settings {
            max_buf_size: DEFAULT_MAX_BUFFER_SIZE,
            max_headers: DEFAULT_MAX_HEADERS,
        }
    }
}

impl H1Settings {
    pub fn new() -> H1Settings {
        H1Settings::default()
    }

    /// Caps how many buffered bytes an unfinished message head may occupy.
    /// Values below the minimum are clamped up.
    pub fn max_buf_size(mut self, max: usize) -> H1Settings {
        self.max_buf_size = cmp::max(max, MINIMUM_MAX_BUFFER_SIZE);
        self
    }

    /// Caps how many headers a message head may carry.
    pub fn max_headers(mut self, max: usize) -> H1Settings {
        self.max_headers = max;
        self
    }

    pub(crate) fn max_buf_size_value(&self) -> usize {
        self.max_buf_size
    }

    pub(crate) fn max_headers_value(&self) -> usize {
        self.max_headers
    }
}

/// Builds HTTP/1 codec endpoints; registered under [`ProtocolId::HTTP1`].
#[derive(Debug, Default, Clone)]
pub struct Http1Factory {
    settings: H1Settings,
}

impl Http1Factory {
    pub fn new() -> Http1Factory {
        Http1Factory {
            settings: H1Settings::default(),
        }
    }

    pub fn with_settings(settings: H1Settings) -> Http1Factory {
        Http1Factory { settings }
    }
}

impl ProtocolFactory for Http1Factory {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::HTTP1
    }

    fn protocol_match(&self, magic: &[u8]) -> MatchResult {
        detect::protocol_match(magic)
    }

    fn new_client(&self, transport: Arc<dyn Connection>) -> Arc<dyn ClientConnection> {
        ClientStreamConnection::new(transport, self.settings.clone())
    }

    fn new_server(
        &self,
        transport: Arc<dyn Connection>,
        listener: Arc<dyn ServerStreamListener>,
    ) -> Arc<dyn StreamConnection> {
        ServerStreamConnection::new(transport, listener, self.settings.clone())
    }

    fn new_bidirectional(
        &self,
        _transport: Arc<dyn Connection>,
        _listener: Arc<dyn ServerStreamListener>,
    ) -> Result<Arc<dyn StreamConnection>> {
        // HTTP/1 has no multiplexed bidirectional streaming semantics.
        debug!("bidirectional stream connection requested for http/1");
        Err(Error::new_unsupported())
    }
}

/// Wires the HTTP/1 codec into `registry`; called once at process start.
pub fn register(registry: &Registry) -> Result<()> {
    registry.register(Arc::new(Http1Factory::new()))
}
