//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have codec `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur handling HTTP/1 stream connections.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(super) enum Kind {
    Parse(Parse),
    /// A message reached EOF, but is not complete.
    IncompleteMessage,
    /// A connection received a message (or bytes) when not waiting for one.
    UnexpectedMessage,
    /// The rendezvous between transport and parser is closed.
    ChannelClosed,
    /// An `io::Error` that occurred while trying to read or write to a
    /// network stream.
    Io,
    /// A new stream was requested while another was still in flight.
    StreamBusy,
    /// The requested operation has no HTTP/1 semantics.
    Unsupported,
    /// A factory was registered under an already-taken protocol id.
    AlreadyRegistered,
}

#[derive(Debug)]
pub(super) enum Parse {
    Method,
    Version,
    Uri,
    Header,
    TooLarge,
    Status,
}

impl Error {
    /// Returns true if this was an HTTP parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if this was an HTTP parse error caused by a message that
    /// was too large.
    pub fn is_parse_too_large(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(Parse::TooLarge))
    }

    /// Returns true if the connection closed before a message could complete.
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// Returns true if a message arrived while no stream was waiting for one.
    pub fn is_unexpected_message(&self) -> bool {
        matches!(self.inner.kind, Kind::UnexpectedMessage)
    }

    /// Returns true if the byte rendezvous is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::ChannelClosed)
    }

    /// Returns true if this was caused by an `io::Error` on the transport.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Returns true if a stream was requested while one was already active.
    pub fn is_stream_busy(&self) -> bool {
        matches!(self.inner.kind, Kind::StreamBusy)
    }

    /// Returns true if the operation is unsupported for HTTP/1.
    pub fn is_unsupported(&self) -> bool {
        matches!(self.inner.kind, Kind::Unsupported)
    }

    /// Returns true if a protocol id was registered twice.
    pub fn is_already_registered(&self) -> bool {
        matches!(self.inner.kind, Kind::AlreadyRegistered)
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(super) fn new_parse(parse: Parse) -> Error {
        Error::new(Kind::Parse(parse))
    }

    pub(super) fn new_incomplete_message() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(super) fn new_unexpected_message() -> Error {
        Error::new(Kind::UnexpectedMessage)
    }

    pub(super) fn new_closed() -> Error {
        Error::new(Kind::ChannelClosed)
    }

    pub(super) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(super) fn new_stream_busy() -> Error {
        Error::new(Kind::StreamBusy)
    }

    pub(super) fn new_unsupported() -> Error {
        Error::new(Kind::Unsupported)
    }

    pub(super) fn new_already_registered() -> Error {
        Error::new(Kind::AlreadyRegistered)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::Method) => "invalid HTTP method parsed",
            Kind::Parse(Parse::Version) => "invalid HTTP version parsed",
            Kind::Parse(Parse::Uri) => "invalid URI",
            Kind::Parse(Parse::Header) => "invalid HTTP header parsed",
            Kind::Parse(Parse::TooLarge) => "message head is too large",
            Kind::Parse(Parse::Status) => "invalid HTTP status-code parsed",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::UnexpectedMessage => "received unexpected message from connection",
            Kind::ChannelClosed => "byte rendezvous closed",
            Kind::Io => "connection error",
            Kind::StreamBusy => "a stream is already active on this connection",
            Kind::Unsupported => "operation unsupported for HTTP/1",
            Kind::AlreadyRegistered => "protocol id already registered",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("weft_h1::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Error {
        let parse = match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token => Parse::Header,
            httparse::Error::Status => Parse::Status,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
            httparse::Error::Version => Parse::Version,
        };
        Error::new_parse(parse)
    }
}
