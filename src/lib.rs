#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # weft-h1
//!
//! The HTTP/1.x stream-connection codec of the weft service-mesh data
//! plane. It adapts HTTP/1 wire framing, one in-flight request/response
//! pair per connection, onto the proxy's uniform stream abstraction shared
//! with the other wire protocols.
//!
//! The codec sits between two collaborators:
//!
//! - **below**, a byte-oriented transport ([`Connection`]) that pushes
//!   received bytes in through [`StreamConnection::dispatch`] and accepts
//!   outbound writes;
//! - **above**, the proxy's stream layer, which receives parsed messages
//!   through a [`StreamReceiveListener`] and sends messages through a
//!   [`StreamSender`].
//!
//! In between, each connection owns a parser task fed by a single-slot
//! byte rendezvous: the transport's `dispatch` does not return until the
//! parser has consumed its bytes, which is the codec's per-connection
//! backpressure.
//!
//! Request-line and status information crosses the proxy's header-only
//! abstraction as reserved in-process keys (see [`headers`]); they are
//! injected at ingress and stripped at egress, never appearing on the
//! wire.

mod error;
pub mod headers;
mod proto;
mod registry;
mod stream;
mod transport;

pub use crate::error::{Error, Result};
pub use crate::headers::{HeaderFrame, RequestHeader, ResponseHeader};
pub use crate::proto::h1::conn::{ClientStreamConnection, ServerStreamConnection};
pub use crate::proto::h1::factory::{register, H1Settings, Http1Factory};
pub use crate::proto::h1::stream::{ClientStream, ServerStream};
pub use crate::registry::{
    ClientConnection, Identified, MatchResult, ProtocolFactory, ProtocolId, Registry,
    StreamConnection,
};
pub use crate::stream::{
    ServerStreamListener, StreamContext, StreamId, StreamReceiveListener, StreamResetReason,
    StreamSender,
};
pub use crate::transport::{ByteFrame, CloseSource, Connection, FlushPolicy};
