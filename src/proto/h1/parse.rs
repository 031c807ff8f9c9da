use bytes::{Buf, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Uri, Version};
use tracing::{debug, trace};

use super::Decoder;
use crate::error::Parse;
use crate::headers;
use crate::proto::{MessageHead, RequestHead, RequestLine, ResponseHead};
use crate::{Error, Result};

/// Tries to parse one complete request head out of `buf`, consuming the head
/// bytes on success. `Ok(None)` means the head is not complete yet.
pub(crate) fn parse_request(
    buf: &mut BytesMut,
    max_headers: usize,
) -> Result<Option<(RequestHead, Decoder)>> {
    consume_leading_lines(buf);
    if buf.is_empty() {
        return Ok(None);
    }
    trace!("Request.parse([Header; {}], [u8; {}])", max_headers, buf.len());

    let mut header_slots = vec![httparse::EMPTY_HEADER; max_headers];
    let mut req = httparse::Request::new(&mut header_slots);
    let len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };
    trace!("Request.parse Complete({})", len);

    let method = Method::from_bytes(req.method.expect("complete parse").as_bytes())
        .map_err(|_| Error::new_parse(Parse::Method))?;
    let uri: Uri = req
        .path
        .expect("complete parse")
        .parse()
        .map_err(|_| Error::new_parse(Parse::Uri))?;
    let version = if req.version.expect("complete parse") == 1 {
        Version::HTTP_11
    } else {
        Version::HTTP_10
    };
    let headers = copy_headers(req.headers)?;
    buf.advance(len);

    let head = MessageHead {
        version,
        subject: RequestLine(method, uri),
        headers,
    };
    let decoder = request_decoder(&head)?;
    Ok(Some((head, decoder)))
}

/// Tries to parse one complete response head out of `buf`. `req_method` is
/// the method of the request being answered; HEAD responses never carry a
/// body regardless of their framing headers.
pub(crate) fn parse_response(
    buf: &mut BytesMut,
    req_method: Option<&Method>,
    max_headers: usize,
) -> Result<Option<(ResponseHead, Decoder)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    trace!(
        "Response.parse([Header; {}], [u8; {}])",
        max_headers,
        buf.len()
    );

    let mut header_slots = vec![httparse::EMPTY_HEADER; max_headers];
    let mut res = httparse::Response::new(&mut header_slots);
    let len = match res.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };
    trace!("Response.parse Complete({})", len);

    let code = res.code.expect("complete parse");
    let version = if res.version.expect("complete parse") == 1 {
        Version::HTTP_11
    } else {
        Version::HTTP_10
    };
    let headers = copy_headers(res.headers)?;
    buf.advance(len);

    let head = MessageHead {
        version,
        subject: code,
        headers,
    };
    let decoder = response_decoder(&head, req_method);
    Ok(Some((head, decoder)))
}

/// Tolerates stray empty lines between messages.
fn consume_leading_lines(buf: &mut BytesMut) {
    while !buf.is_empty() {
        match buf[0] {
            b'\r' if buf.len() > 1 && buf[1] == b'\n' => buf.advance(2),
            b'\n' => buf.advance(1),
            b'\r' if buf.len() == 1 => break,
            _ => break,
        }
    }
}

/// Copies parsed header slices into an owned map; the parse buffer is
/// recycled per message, so nothing may borrow from it after this.
fn copy_headers(parsed: &[httparse::Header<'_>]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(parsed.len());
    for header in parsed {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| Error::new_parse(Parse::Header))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| Error::new_parse(Parse::Header))?;
        headers.append(name, value);
    }
    Ok(headers)
}

// Request body framing, per RFC 7230 section 3.3.3:
// chunked must be the final transfer encoding, else the request is
// malformed; differing Content-Length values are malformed too.
fn request_decoder(head: &RequestHead) -> Result<Decoder> {
    if head.headers.contains_key(TRANSFER_ENCODING) {
        if head.headers.contains_key(CONTENT_LENGTH) {
            debug!("request with both transfer-encoding and content-length");
            return Err(Error::new_parse(Parse::Header));
        }
        if headers::transfer_encoding_is_chunked(&head.headers) {
            Ok(Decoder::chunked())
        } else {
            debug!("request with transfer-encoding header, but not chunked");
            Err(Error::new_parse(Parse::Header))
        }
    } else if head.headers.contains_key(CONTENT_LENGTH) {
        match headers::content_length_parse_all(&head.headers) {
            Some(len) => Ok(Decoder::length(len)),
            None => {
                debug!("illegal Content-Length {:?}", head.headers.get(CONTENT_LENGTH));
                Err(Error::new_parse(Parse::Header))
            }
        }
    } else {
        Ok(Decoder::length(0))
    }
}

// Response body framing: some responses never have a body, chunked and
// sized bodies follow their headers, and anything else is delimited by the
// connection closing.
fn response_decoder(head: &ResponseHead, req_method: Option<&Method>) -> Decoder {
    if req_method == Some(&Method::HEAD) {
        return Decoder::length(0);
    }
    let code = head.subject;
    if (100..200).contains(&code) || code == 204 || code == 304 {
        return Decoder::length(0);
    }
    if headers::transfer_encoding_is_chunked(&head.headers) {
        return Decoder::chunked();
    }
    match headers::content_length_parse_all(&head.headers) {
        Some(len) => Decoder::length(len),
        None => Decoder::eof(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::DEFAULT_MAX_HEADERS;

    fn buf(bytes: &[u8]) -> BytesMut {
        BytesMut::from(bytes)
    }

    #[test]
    fn parse_simple_get() {
        let mut raw = buf(b"GET /echo?a=1 HTTP/1.1\r\nHost: upstream\r\n\r\ntrailing");
        let (head, decoder) = parse_request(&mut raw, DEFAULT_MAX_HEADERS)
            .expect("parse")
            .expect("complete");
        assert_eq!(head.subject.0, Method::GET);
        assert_eq!(head.subject.1.path(), "/echo");
        assert_eq!(head.subject.1.query(), Some("a=1"));
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.headers["host"], "upstream");
        assert!(decoder.is_eof());
        // Only the head is consumed.
        assert_eq!(&raw[..], b"trailing");
    }

    #[test]
    fn parse_partial_returns_none() {
        let mut raw = buf(b"GET /wait HTTP/1.1\r\nHost:");
        assert!(parse_request(&mut raw, DEFAULT_MAX_HEADERS)
            .expect("no error")
            .is_none());
        assert_eq!(&raw[..], b"GET /wait HTTP/1.1\r\nHost:");
    }

    #[test]
    fn parse_skips_leading_empty_lines() {
        let mut raw = buf(b"\r\n\r\nGET / HTTP/1.0\r\n\r\n");
        let (head, _) = parse_request(&mut raw, DEFAULT_MAX_HEADERS)
            .unwrap()
            .unwrap();
        assert_eq!(head.version, Version::HTTP_10);
    }

    #[test]
    fn parse_content_length_body() {
        let mut raw = buf(b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        let (_, decoder) = parse_request(&mut raw, DEFAULT_MAX_HEADERS)
            .unwrap()
            .unwrap();
        assert!(!decoder.is_eof());
        assert_eq!(&raw[..], b"hello");
    }

    #[test]
    fn parse_rejects_non_chunked_transfer_encoding() {
        let mut raw = buf(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n");
        let err = parse_request(&mut raw, DEFAULT_MAX_HEADERS).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn parse_rejects_conflicting_lengths() {
        let mut raw = buf(
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        assert!(parse_request(&mut raw, DEFAULT_MAX_HEADERS).is_err());

        let mut raw = buf(b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n");
        assert!(parse_request(&mut raw, DEFAULT_MAX_HEADERS).is_err());
    }

    #[test]
    fn parse_response_status_line() {
        let mut raw = buf(b"HTTP/1.1 204 No Content\r\n\r\n");
        let (head, decoder) = parse_response(&mut raw, Some(&Method::GET), DEFAULT_MAX_HEADERS)
            .unwrap()
            .unwrap();
        assert_eq!(head.subject, 204);
        assert!(decoder.is_eof());
    }

    #[test]
    fn head_response_has_no_body() {
        let mut raw = buf(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n");
        let (_, decoder) = parse_response(&mut raw, Some(&Method::HEAD), DEFAULT_MAX_HEADERS)
            .unwrap()
            .unwrap();
        assert!(decoder.is_eof());
    }

    #[test]
    fn unframed_response_reads_to_eof() {
        let mut raw = buf(b"HTTP/1.0 200 OK\r\n\r\nsome body");
        let (_, decoder) = parse_response(&mut raw, Some(&Method::GET), DEFAULT_MAX_HEADERS)
            .unwrap()
            .unwrap();
        assert!(!decoder.is_eof());
    }
}
