use bytes::BytesMut;
use http::header::{HeaderName, CONTENT_LENGTH, DATE, TRANSFER_ENCODING};
use http::{HeaderMap, StatusCode, Version};
use tracing::trace;

use super::date;
use crate::headers::is_internal_key;
use crate::proto::{RequestHead, ResponseHead};

// totally scientific
const AVERAGE_HEADER_SIZE: usize = 30;

/// Serializes a complete request, head and body, ready for the transport.
///
/// Body framing is always `Content-Length`; this codec does not produce
/// chunked egress, bodies are buffered whole per stream.
pub(crate) fn encode_request(head: &RequestHead, body: &[u8]) -> BytesMut {
    trace!(
        "encode_request method={:?}, body={}B",
        head.subject.0,
        body.len()
    );
    let mut dst = BytesMut::with_capacity(
        30 + head.headers.len() * AVERAGE_HEADER_SIZE + body.len(),
    );

    dst.extend_from_slice(head.subject.0.as_str().as_bytes());
    dst.extend_from_slice(b" ");
    let target = head
        .subject
        .1
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    dst.extend_from_slice(target.as_bytes());
    dst.extend_from_slice(match head.version {
        Version::HTTP_10 => b" HTTP/1.0\r\n",
        _ => b" HTTP/1.1\r\n",
    });

    write_headers(&head.headers, &mut dst);
    if !body.is_empty() {
        write_content_length(body.len(), &mut dst);
    }
    dst.extend_from_slice(b"\r\n");
    dst.extend_from_slice(body);
    dst
}

/// Serializes a complete response. `Content-Length` is always emitted, and
/// a cached `Date` header is added unless the proxy supplied one.
pub(crate) fn encode_response(head: &ResponseHead, body: &[u8]) -> BytesMut {
    trace!(
        "encode_response status={}, body={}B",
        head.subject,
        body.len()
    );
    let mut dst = BytesMut::with_capacity(
        30 + head.headers.len() * AVERAGE_HEADER_SIZE + body.len(),
    );

    // Status 0 is the unset sentinel and serializes as 200.
    let code = if head.subject == 0 { 200 } else { head.subject };
    if code == 200 {
        dst.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
    } else {
        dst.extend_from_slice(b"HTTP/1.1 ");
        let mut buffer = itoa::Buffer::new();
        dst.extend_from_slice(buffer.format(code).as_bytes());
        dst.extend_from_slice(b" ");
        let reason = StatusCode::from_u16(code)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("");
        dst.extend_from_slice(reason.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }

    write_headers(&head.headers, &mut dst);
    if !head.headers.contains_key(DATE) {
        dst.extend_from_slice(b"date: ");
        date::extend(&mut dst);
        dst.extend_from_slice(b"\r\n");
    }
    write_content_length(body.len(), &mut dst);
    dst.extend_from_slice(b"\r\n");
    dst.extend_from_slice(body);
    dst
}

// The codec owns body framing, so user-supplied framing headers are
// dropped along with the in-process keys.
fn skip_header(name: &HeaderName) -> bool {
    is_internal_key(name) || *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING
}

fn write_headers(headers: &HeaderMap, dst: &mut BytesMut) {
    for (name, value) in headers.iter() {
        if skip_header(name) {
            continue;
        }
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
}

fn write_content_length(len: usize, dst: &mut BytesMut) {
    dst.extend_from_slice(b"content-length: ");
    let mut buffer = itoa::Buffer::new();
    dst.extend_from_slice(buffer.format(len).as_bytes());
    dst.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::INTERNAL_METHOD;
    use crate::proto::{MessageHead, RequestLine};
    use http::header::{HeaderValue, HOST};
    use http::Method;

    fn request_head(method: Method, uri: &str) -> RequestHead {
        MessageHead {
            version: Version::HTTP_11,
            subject: RequestLine(method, uri.parse().unwrap()),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn request_line_and_host() {
        let mut head = request_head(Method::GET, "/x?q=1");
        head.headers
            .insert(HOST, HeaderValue::from_static("upstream"));
        let wire = encode_request(&head, b"");
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("GET /x?q=1 HTTP/1.1\r\n"), "{:?}", text);
        assert!(text.contains("host: upstream\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("content-length"));
    }

    #[test]
    fn request_body_gets_content_length() {
        let head = request_head(Method::POST, "/submit");
        let wire = encode_request(&head, b"hello");
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn internal_keys_never_reach_the_wire() {
        let mut head = request_head(Method::GET, "/");
        head.headers
            .insert(INTERNAL_METHOD, HeaderValue::from_static("GET"));
        let wire = encode_request(&head, b"");
        assert!(!wire.windows(4).any(|w| w == b"mosn"));
    }

    #[test]
    fn response_has_date_and_length() {
        let head = MessageHead {
            version: Version::HTTP_11,
            subject: 200u16,
            headers: HeaderMap::new(),
        };
        let wire = encode_response(&head, b"ok");
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("date: "));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nok"));
    }

    #[test]
    fn unset_status_serializes_as_200() {
        let head = MessageHead {
            version: Version::HTTP_11,
            subject: 0u16,
            headers: HeaderMap::new(),
        };
        let wire = encode_response(&head, b"");
        assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn framing_headers_are_codec_owned() {
        let mut head = MessageHead {
            version: Version::HTTP_11,
            subject: 503u16,
            headers: HeaderMap::new(),
        };
        head.headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("999"));
        head.headers
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        let wire = encode_response(&head, b"unavailable");
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.contains("content-length: 11\r\n"));
        assert!(!text.contains("999"));
        assert!(!text.contains("transfer-encoding"));
    }
}
