use std::error::Error as StdError;
use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use super::io::MemRead;

use self::Kind::{Chunked, Eof, Length};

/// Decoders to handle different Transfer-Encodings.
///
/// If a message body does not include a Transfer-Encoding, it *should*
/// include a Content-Length header.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Decoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    /// A Reader used when a Content-Length header is passed with a positive
    /// integer.
    Length(u64),
    /// A Reader used when Transfer-Encoding is `chunked`.
    Chunked(ChunkedState, u64),
    /// A Reader used for responses that don't indicate a length or chunked.
    ///
    /// The bool tracks when EOF is seen on the transport. Only used for
    /// `Response`s: requests without length framing have empty bodies.
    Eof(bool),
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum ChunkedState {
    Start,
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

impl Decoder {
    // constructors

    pub(crate) fn length(x: u64) -> Decoder {
        Decoder {
            kind: Kind::Length(x),
        }
    }

    pub(crate) fn chunked() -> Decoder {
        Decoder {
            kind: Kind::Chunked(ChunkedState::Start, 0),
        }
    }

    pub(crate) fn eof() -> Decoder {
        Decoder {
            kind: Kind::Eof(false),
        }
    }

    // methods

    pub(crate) fn is_eof(&self) -> bool {
        matches!(
            self.kind,
            Length(0) | Chunked(ChunkedState::End, _) | Eof(true)
        )
    }

    /// Close-delimited bodies consume the connection; it cannot be reused
    /// for another exchange afterwards.
    pub(crate) fn is_close_delimited(&self) -> bool {
        matches!(self.kind, Eof(_))
    }

    /// Pulls the next slice of body bytes. An empty slice means the body is
    /// complete.
    pub(crate) async fn decode<R: MemRead>(&mut self, body: &mut R) -> io::Result<Bytes> {
        trace!("decode; state={:?}", self.kind);
        match self.kind {
            Length(ref mut remaining) => {
                if *remaining == 0 {
                    Ok(Bytes::new())
                } else {
                    let to_read = *remaining as usize;
                    let buf = body.read_mem(to_read).await?;
                    let num = buf.as_ref().len() as u64;
                    if num > *remaining {
                        *remaining = 0;
                    } else if num == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, IncompleteBody));
                    } else {
                        *remaining -= num;
                    }
                    Ok(buf)
                }
            }
            Chunked(ref mut state, ref mut size) => {
                loop {
                    let mut buf = None;
                    // advances the chunked state
                    *state = state.step(body, size, &mut buf).await?;
                    if *state == ChunkedState::End {
                        trace!("end of chunked");
                        return Ok(Bytes::new());
                    }
                    if let Some(buf) = buf {
                        return Ok(buf);
                    }
                }
            }
            Eof(ref mut is_eof) => {
                if *is_eof {
                    Ok(Bytes::new())
                } else {
                    // 8192 chosen because its about 2 packets, there probably
                    // won't be that much available, so don't have the reader
                    // allocate buffers too big
                    let slice = body.read_mem(8192).await?;
                    *is_eof = slice.is_empty();
                    Ok(slice)
                }
            }
        }
    }

    /// Drains the whole body, concatenating every decoded slice.
    ///
    /// Messages are delivered to the proxy head-then-body, so the parser
    /// task buffers the complete body before hand-off.
    pub(crate) async fn read_to_end<R: MemRead>(&mut self, body: &mut R) -> io::Result<Bytes> {
        let mut all = BytesMut::new();
        loop {
            let slice = self.decode(body).await?;
            if slice.is_empty() {
                return Ok(all.freeze());
            }
            all.extend_from_slice(&slice);
        }
    }
}

async fn byte<R: MemRead>(rdr: &mut R) -> io::Result<u8> {
    let buf = rdr.read_mem(1).await?;
    if buf.is_empty() {
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "unexpected EOF during chunk size line",
        ))
    } else {
        Ok(buf[0])
    }
}

impl ChunkedState {
    async fn step<R: MemRead>(
        &self,
        body: &mut R,
        size: &mut u64,
        buf: &mut Option<Bytes>,
    ) -> io::Result<ChunkedState> {
        use self::ChunkedState::*;
        match *self {
            Start => ChunkedState::read_start(body, size).await,
            Size => ChunkedState::read_size(body, size).await,
            SizeLws => ChunkedState::read_size_lws(body).await,
            Extension => ChunkedState::read_extension(body).await,
            SizeLf => ChunkedState::read_size_lf(body, *size).await,
            Body => ChunkedState::read_body(body, size, buf).await,
            BodyCr => ChunkedState::read_body_cr(body).await,
            BodyLf => ChunkedState::read_body_lf(body).await,
            Trailer => ChunkedState::read_trailer(body).await,
            TrailerLf => ChunkedState::read_trailer_lf(body).await,
            EndCr => ChunkedState::read_end_cr(body).await,
            EndLf => ChunkedState::read_end_lf(body).await,
            End => Ok(ChunkedState::End),
        }
    }

    async fn read_start<R: MemRead>(rdr: &mut R, size: &mut u64) -> io::Result<ChunkedState> {
        trace!("Read chunk start");
        let radix = 16;
        match byte(rdr).await? {
            b @ b'0'..=b'9' => {
                *size = checked_size(*size, radix, (b - b'0') as u64)?;
            }
            b @ b'a'..=b'f' => {
                *size = checked_size(*size, radix, (b + 10 - b'a') as u64)?;
            }
            b @ b'A'..=b'F' => {
                *size = checked_size(*size, radix, (b + 10 - b'A') as u64)?;
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Invalid chunk size line: missing size digit",
                ));
            }
        }
        Ok(ChunkedState::Size)
    }

    async fn read_size<R: MemRead>(rdr: &mut R, size: &mut u64) -> io::Result<ChunkedState> {
        trace!("Read chunk hex size");
        let radix = 16;
        match byte(rdr).await? {
            b @ b'0'..=b'9' => {
                *size = checked_size(*size, radix, (b - b'0') as u64)?;
            }
            b @ b'a'..=b'f' => {
                *size = checked_size(*size, radix, (b + 10 - b'a') as u64)?;
            }
            b @ b'A'..=b'F' => {
                *size = checked_size(*size, radix, (b + 10 - b'A') as u64)?;
            }
            b'\t' | b' ' => return Ok(ChunkedState::SizeLws),
            b';' => return Ok(ChunkedState::Extension),
            b'\r' => return Ok(ChunkedState::SizeLf),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Invalid chunk size line: Invalid Size",
                ));
            }
        }
        Ok(ChunkedState::Size)
    }

    async fn read_size_lws<R: MemRead>(rdr: &mut R) -> io::Result<ChunkedState> {
        trace!("read_size_lws");
        match byte(rdr).await? {
            // LWS can follow the chunk size, but no more digits can come
            b'\t' | b' ' => Ok(ChunkedState::SizeLws),
            b';' => Ok(ChunkedState::Extension),
            b'\r' => Ok(ChunkedState::SizeLf),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Invalid chunk size linear white space",
            )),
        }
    }

    async fn read_extension<R: MemRead>(rdr: &mut R) -> io::Result<ChunkedState> {
        trace!("read_extension");
        // Extensions are skipped, not parsed. An LF before the CR would
        // split the size line, so it is rejected.
        match byte(rdr).await? {
            b'\r' => Ok(ChunkedState::SizeLf),
            b'\n' => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid chunk extension contains newline",
            )),
            _ => Ok(ChunkedState::Extension),
        }
    }

    async fn read_size_lf<R: MemRead>(rdr: &mut R, size: u64) -> io::Result<ChunkedState> {
        trace!("Chunk size is {:?}", size);
        match byte(rdr).await? {
            b'\n' => {
                if size == 0 {
                    Ok(ChunkedState::EndCr)
                } else {
                    trace!("incoming chunked header: {0:#X} ({0} bytes)", size);
                    Ok(ChunkedState::Body)
                }
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Invalid chunk size LF",
            )),
        }
    }

    async fn read_body<R: MemRead>(
        rdr: &mut R,
        rem: &mut u64,
        buf: &mut Option<Bytes>,
    ) -> io::Result<ChunkedState> {
        trace!("Chunked read, remaining={:?}", rem);

        // cap remaining bytes at the max capacity of usize
        let rem_cap = match *rem {
            r if r > usize::MAX as u64 => usize::MAX,
            r => r as usize,
        };
        let slice = rdr.read_mem(rem_cap).await?;
        let count = slice.len();

        if count == 0 {
            *rem = 0;
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, IncompleteBody));
        }
        *buf = Some(slice);
        *rem -= count as u64;

        if *rem > 0 {
            Ok(ChunkedState::Body)
        } else {
            Ok(ChunkedState::BodyCr)
        }
    }

    async fn read_body_cr<R: MemRead>(rdr: &mut R) -> io::Result<ChunkedState> {
        match byte(rdr).await? {
            b'\r' => Ok(ChunkedState::BodyLf),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Invalid chunk body CR",
            )),
        }
    }

    async fn read_body_lf<R: MemRead>(rdr: &mut R) -> io::Result<ChunkedState> {
        match byte(rdr).await? {
            b'\n' => Ok(ChunkedState::Start),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Invalid chunk body LF",
            )),
        }
    }

    // Trailer fields are consumed and discarded; nothing downstream of an
    // HTTP/1 stream reinjects them.
    async fn read_trailer<R: MemRead>(rdr: &mut R) -> io::Result<ChunkedState> {
        trace!("read_trailer");
        match byte(rdr).await? {
            b'\r' => Ok(ChunkedState::TrailerLf),
            _ => Ok(ChunkedState::Trailer),
        }
    }

    async fn read_trailer_lf<R: MemRead>(rdr: &mut R) -> io::Result<ChunkedState> {
        match byte(rdr).await? {
            b'\n' => Ok(ChunkedState::EndCr),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Invalid trailer end LF",
            )),
        }
    }

    async fn read_end_cr<R: MemRead>(rdr: &mut R) -> io::Result<ChunkedState> {
        match byte(rdr).await? {
            b'\r' => Ok(ChunkedState::EndLf),
            _ => Ok(ChunkedState::Trailer),
        }
    }

    async fn read_end_lf<R: MemRead>(rdr: &mut R) -> io::Result<ChunkedState> {
        match byte(rdr).await? {
            b'\n' => Ok(ChunkedState::End),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Invalid chunk end LF",
            )),
        }
    }
}

fn checked_size(size: u64, radix: u64, digit: u64) -> io::Result<u64> {
    size.checked_mul(radix)
        .and_then(|s| s.checked_add(digit))
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size: overflow")
        })
}

#[derive(Debug)]
struct IncompleteBody;

impl fmt::Display for IncompleteBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "end of file before message length reached")
    }
}

impl StdError for IncompleteBody {}
