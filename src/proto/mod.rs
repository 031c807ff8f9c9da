//! Pieces pertaining to the HTTP message protocol.

use http::{HeaderMap, Method, Uri, Version};

/// The initial read buffer size allocated before pulling from the rendezvous.
pub(crate) const INIT_BUFFER_SIZE: usize = 8192;

/// The minimum value that can be set to max buffer size.
pub(crate) const MINIMUM_MAX_BUFFER_SIZE: usize = INIT_BUFFER_SIZE;

/// The default maximum read buffer size. If the buffer gets this big and
/// a message head is still not complete, a `TooLarge` error is triggered.
pub(crate) const DEFAULT_MAX_BUFFER_SIZE: usize = MINIMUM_MAX_BUFFER_SIZE + 4096 * 100;

/// The default maximum number of headers allowed in a message head.
pub(crate) const DEFAULT_MAX_HEADERS: usize = 100;

pub(crate) mod h1;

/// An incoming or outgoing message head. Includes request/status line, and
/// headers.
#[derive(Debug, Default)]
pub(crate) struct MessageHead<S> {
    /// HTTP version of the message.
    pub(crate) version: Version,
    /// Subject (request line or status line) of the message.
    pub(crate) subject: S,
    /// Headers of the message.
    pub(crate) headers: HeaderMap,
}

/// A request message head.
pub(crate) type RequestHead = MessageHead<RequestLine>;

#[derive(Debug, Default, PartialEq)]
pub(crate) struct RequestLine(pub(crate) Method, pub(crate) Uri);

/// A response message head.
///
/// The status is the raw wire code: the internal status key round-trips
/// values `StatusCode` would reject, including the unparseable-status
/// sentinel `0`.
pub(crate) type ResponseHead = MessageHead<u16>;
