//! The protocol registry.
//!
//! Codecs advertise themselves here at process start; the proxy's listener
//! layer sniffs the first bytes of each accepted connection against every
//! registered factory to pick the codec that owns it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::stream::{ServerStreamListener, StreamReceiveListener, StreamSender};
use crate::transport::{ByteFrame, Connection};
use crate::{Error, Result};

/// Identifies one wire protocol in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolId(&'static str);

impl ProtocolId {
    pub const HTTP1: ProtocolId = ProtocolId("Http1");

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

/// Verdict of a factory inspecting the initial bytes of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The bytes belong to this protocol.
    Match,
    /// Not enough bytes yet to decide.
    Again,
    /// The bytes belong to some other protocol.
    Fail,
}

/// The registry's combined verdict across all factories.
pub enum Identified {
    Known(Arc<dyn ProtocolFactory>),
    NeedMoreData,
    Unknown,
}

impl fmt::Debug for Identified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identified::Known(factory) => {
                f.debug_tuple("Known").field(&factory.protocol()).finish()
            }
            Identified::NeedMoreData => f.write_str("NeedMoreData"),
            Identified::Unknown => f.write_str("Unknown"),
        }
    }
}

/// The codec endpoint attached to one transport connection.
pub trait StreamConnection: Send + Sync + 'static {
    fn protocol(&self) -> ProtocolId;

    /// Feeds bytes received by the transport into the codec. Resolves once
    /// the codec has consumed them all; awaiting this is the transport's
    /// per-connection backpressure.
    fn dispatch(&self, frame: ByteFrame) -> BoxFuture<'_, Result<()>>;

    /// Tears the codec down. Called exactly once during connection
    /// teardown, from either side's initiative.
    fn reset(&self);

    /// How many streams are live on this connection; for HTTP/1 this is 0
    /// or 1.
    fn active_streams(&self) -> usize;
}

/// A [`StreamConnection`] in the client role, able to originate streams.
pub trait ClientConnection: StreamConnection {
    fn new_stream(
        &self,
        receiver: Arc<dyn StreamReceiveListener>,
    ) -> Result<Arc<dyn StreamSender>>;
}

/// Builds codec endpoints for one protocol over accepted transport
/// connections.
pub trait ProtocolFactory: Send + Sync + 'static {
    fn protocol(&self) -> ProtocolId;

    /// Inspects the initial bytes of a fresh connection.
    fn protocol_match(&self, magic: &[u8]) -> MatchResult;

    fn new_client(&self, transport: Arc<dyn Connection>) -> Arc<dyn ClientConnection>;

    fn new_server(
        &self,
        transport: Arc<dyn Connection>,
        listener: Arc<dyn ServerStreamListener>,
    ) -> Arc<dyn StreamConnection>;

    /// Connections carrying concurrent streams in both roles. Protocols
    /// without multiplexed bidirectional semantics reject the call.
    fn new_bidirectional(
        &self,
        transport: Arc<dyn Connection>,
        listener: Arc<dyn ServerStreamListener>,
    ) -> Result<Arc<dyn StreamConnection>>;
}

#[derive(Default)]
pub struct Registry {
    factories: RwLock<HashMap<ProtocolId, Arc<dyn ProtocolFactory>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories = self.factories.read().expect("registry lock poisoned");
        f.debug_set().entries(factories.keys()).finish()
    }
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers a factory under its protocol id. Ids are unique; a second
    /// registration is refused.
    pub fn register(&self, factory: Arc<dyn ProtocolFactory>) -> Result<()> {
        let id = factory.protocol();
        let mut factories = self.factories.write().expect("registry lock poisoned");
        if factories.contains_key(&id) {
            debug!(protocol = id.as_str(), "duplicate protocol registration");
            return Err(Error::new_already_registered());
        }
        factories.insert(id, factory);
        Ok(())
    }

    pub fn get(&self, id: ProtocolId) -> Option<Arc<dyn ProtocolFactory>> {
        self.factories
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Sniffs `magic` against every registered factory. The first match
    /// wins; if none match but some want more bytes, the caller should wait
    /// and retry with a longer prefix.
    pub fn identify(&self, magic: &[u8]) -> Identified {
        let factories = self.factories.read().expect("registry lock poisoned");
        let mut need_more = false;
        for factory in factories.values() {
            match factory.protocol_match(magic) {
                MatchResult::Match => return Identified::Known(factory.clone()),
                MatchResult::Again => need_more = true,
                MatchResult::Fail => {}
            }
        }
        if need_more {
            Identified::NeedMoreData
        } else {
            Identified::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::h1::factory::Http1Factory;

    #[test]
    fn duplicate_registration_is_refused() {
        let registry = Registry::new();
        registry
            .register(Arc::new(Http1Factory::new()))
            .expect("first registration");
        let err = registry
            .register(Arc::new(Http1Factory::new()))
            .expect_err("second registration");
        assert!(err.is_already_registered());
    }

    #[test]
    fn identify_consults_every_factory() {
        let registry = Registry::new();
        registry.register(Arc::new(Http1Factory::new())).unwrap();

        assert!(matches!(registry.identify(b"GET "), Identified::Known(_)));
        assert!(matches!(registry.identify(b"GE"), Identified::NeedMoreData));
        assert!(matches!(registry.identify(b"PRI * HTTP/2.0"), Identified::Unknown));
        // An empty registry knows nothing and never asks for more.
        assert!(matches!(Registry::new().identify(b"GE"), Identified::Unknown));
    }
}
