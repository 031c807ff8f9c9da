use std::cmp;
use std::io;

use bytes::{Bytes, BytesMut};
use http::Method;
use tracing::trace;

use super::parse;
use super::rendezvous::Reader;
use super::Decoder;
use crate::error::Parse;
use crate::proto::{RequestHead, ResponseHead, INIT_BUFFER_SIZE};
use crate::{Error, Result};

/// Buffered reader over the rendezvous consumer, owned by the parser task.
///
/// Head bytes accumulate in `read_buf` until a complete head parses; body
/// bytes are pulled through `read_mem`, preferring buffered leftovers over
/// fresh rendezvous reads.
pub(crate) struct Buffered {
    reader: Reader,
    read_buf: BytesMut,
    read_eof: bool,
    max_buf_size: usize,
    max_headers: usize,
}

impl Buffered {
    pub(crate) fn new(reader: Reader, max_buf_size: usize, max_headers: usize) -> Buffered {
        Buffered {
            reader,
            read_buf: BytesMut::with_capacity(0),
            read_eof: false,
            max_buf_size,
            max_headers,
        }
    }

    /// Reads one complete request head, blocking on the rendezvous as
    /// needed. `Ok(None)` is a clean end-of-stream between messages.
    pub(crate) async fn read_request_head(
        &mut self,
    ) -> Result<Option<(RequestHead, Decoder)>> {
        let max_headers = self.max_headers;
        self.read_head_with(move |buf| parse::parse_request(buf, max_headers))
            .await
    }

    /// Reads one complete response head. `req_method` looks up the method
    /// of the request this response answers, which decides body framing for
    /// HEAD; it is consulted only once a complete head is at hand.
    pub(crate) async fn read_response_head(
        &mut self,
        req_method: impl Fn() -> Option<Method> + Send,
    ) -> Result<Option<(ResponseHead, Decoder)>> {
        let max_headers = self.max_headers;
        self.read_head_with(move |buf| {
            parse::parse_response(buf, req_method().as_ref(), max_headers)
        })
        .await
    }

    async fn read_head_with<T>(
        &mut self,
        try_parse: impl Fn(&mut BytesMut) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        loop {
            if let Some(msg) = try_parse(&mut self.read_buf)? {
                return Ok(Some(msg));
            }
            if self.read_buf.len() >= self.max_buf_size {
                trace!("max_buf_size ({}) reached, closing", self.max_buf_size);
                return Err(Error::new_parse(Parse::TooLarge));
            }
            if self.fill_read_buf().await == 0 {
                return if self.read_buf.is_empty() {
                    trace!("read eof");
                    Ok(None)
                } else {
                    Err(Error::new_incomplete_message())
                };
            }
        }
    }

    async fn fill_read_buf(&mut self) -> usize {
        if self.read_eof {
            return 0;
        }
        let off = self.read_buf.len();
        self.read_buf.resize(off + INIT_BUFFER_SIZE, 0);
        let n = self.reader.read(&mut self.read_buf[off..]).await;
        self.read_buf.truncate(off + n);
        if n == 0 {
            self.read_eof = true;
        }
        n
    }
}

/// Byte-at-a-time-ish body reads, decoupled from `Buffered` so decoder
/// tests can drive plain slices.
pub(crate) trait MemRead {
    /// Pulls up to `len` body bytes. An empty `Bytes` means end-of-stream.
    async fn read_mem(&mut self, len: usize) -> io::Result<Bytes>;
}

impl MemRead for Buffered {
    async fn read_mem(&mut self, len: usize) -> io::Result<Bytes> {
        if !self.read_buf.is_empty() {
            let n = cmp::min(len, self.read_buf.len());
            return Ok(self.read_buf.split_to(n).freeze());
        }
        if self.read_eof {
            return Ok(Bytes::new());
        }
        let mut buf = vec![0; cmp::min(len, INIT_BUFFER_SIZE)];
        let n = self.reader.read(&mut buf).await;
        if n == 0 {
            self.read_eof = true;
            return Ok(Bytes::new());
        }
        buf.truncate(n);
        Ok(buf.into())
    }
}
