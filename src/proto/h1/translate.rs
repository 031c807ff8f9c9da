//! Translation between HTTP/1 wire heads and the proxy's header-only view.
//!
//! Ingress folds the request line (and response status) into the reserved
//! internal keys; egress unfolds them back into wire fields and strips every
//! internal key, so none can escape onto the wire.

use std::net::SocketAddr;

use http::header::{HeaderValue, CONNECTION, HOST};
use http::{HeaderMap, Method, Uri, Version};
use tracing::debug;

use crate::error::Parse;
use crate::headers::{
    connection_close, connection_keep_alive, RequestHeader, ResponseHeader, INTERNAL_AUTHORITY,
    INTERNAL_HOST, INTERNAL_METHOD, INTERNAL_PATH, INTERNAL_QUERYSTRING, INTERNAL_STATUS,
};
use crate::proto::{MessageHead, RequestHead, RequestLine, ResponseHead};
use crate::{Error, Result};

/// Builds the routing view of a parsed request: an owned header copy with
/// the request-line fields injected under the internal keys.
pub(crate) fn ingress_request(head: &RequestHead) -> RequestHeader {
    let mut map = head.headers.clone();
    let uri = &head.subject.1;

    let host = uri
        .host()
        .and_then(|h| HeaderValue::from_str(h).ok())
        .or_else(|| map.get(HOST).cloned());
    if let Some(host) = host {
        map.insert(INTERNAL_HOST, host.clone());
        map.insert(INTERNAL_AUTHORITY, host);
    }
    if let Ok(method) = HeaderValue::from_str(head.subject.0.as_str()) {
        map.insert(INTERNAL_METHOD, method);
    }
    if let Ok(path) = HeaderValue::from_str(uri.path()) {
        map.insert(INTERNAL_PATH, path);
    }
    if let Some(query) = uri.query() {
        if !query.is_empty() {
            if let Ok(query) = HeaderValue::from_str(query) {
                map.insert(INTERNAL_QUERYSTRING, query);
            }
        }
    }
    RequestHeader::new(map)
}

/// Builds the routing view of a parsed response, carrying the status code
/// under the internal status key.
pub(crate) fn ingress_response(head: &ResponseHead) -> ResponseHeader {
    let mut map = head.headers.clone();
    let mut buffer = itoa::Buffer::new();
    if let Ok(status) = HeaderValue::from_str(buffer.format(head.subject)) {
        map.insert(INTERNAL_STATUS, status);
    }
    ResponseHeader::new(map)
}

/// Reconstructs an outbound request head from a routing header map,
/// removing every internal key.
///
/// Absent a method key, a headers-only message defaults to GET and one with
/// a body to POST. Absent a host key, the remote peer's address stands in.
pub(crate) fn egress_request(
    mut map: HeaderMap,
    end_stream: bool,
    remote_addr: Option<SocketAddr>,
) -> Result<RequestHead> {
    let method = match map.remove(&INTERNAL_METHOD) {
        Some(value) => Method::from_bytes(value.as_bytes())
            .map_err(|_| Error::new_parse(Parse::Method))?,
        None if end_stream => Method::GET,
        None => Method::POST,
    };

    let path = map.remove(&INTERNAL_PATH);
    let path = path
        .as_ref()
        .and_then(|value| value.to_str().ok())
        .unwrap_or("/");
    let query = map.remove(&INTERNAL_QUERYSTRING);
    let uri: Uri = match query.as_ref().and_then(|value| value.to_str().ok()) {
        Some(query) => format!("{}?{}", path, query)
            .parse()
            .map_err(|_| Error::new_parse(Parse::Uri))?,
        None => path.parse().map_err(|_| Error::new_parse(Parse::Uri))?,
    };

    let host = map
        .remove(&INTERNAL_HOST)
        .or_else(|| map.remove(&INTERNAL_AUTHORITY))
        .or_else(|| {
            remote_addr.and_then(|addr| HeaderValue::from_str(&addr.to_string()).ok())
        });
    map.remove(&INTERNAL_AUTHORITY);
    map.remove(&INTERNAL_STATUS);
    if let Some(host) = host {
        map.insert(HOST, host);
    }

    Ok(MessageHead {
        version: Version::HTTP_11,
        subject: RequestLine(method, uri),
        headers: map,
    })
}

/// Removes the internal status key and parses it; an unparseable value
/// degrades to 0, the upper layer validates status semantics.
pub(crate) fn take_status(map: &mut HeaderMap) -> u16 {
    match map.remove(&INTERNAL_STATUS) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| {
                debug!("unparseable internal status {:?}", value);
                0
            }),
        None => 0,
    }
}

/// Whether the peer asked for the connection to end after this message.
///
/// `Connection: close` ends it on any version; HTTP/1.0 also ends it unless
/// keep-alive was requested explicitly.
pub(crate) fn wants_close<S>(head: &MessageHead<S>) -> bool {
    let mut close = false;
    let mut keep_alive = false;
    for value in head.headers.get_all(CONNECTION) {
        close |= connection_close(value);
        keep_alive |= connection_keep_alive(value);
    }
    if close {
        true
    } else if head.version == Version::HTTP_11 {
        false
    } else {
        !keep_alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::h1::encode::encode_request;

    fn parsed_get(uri: &str, host: Option<&'static str>) -> RequestHead {
        let mut headers = HeaderMap::new();
        if let Some(host) = host {
            headers.insert(HOST, HeaderValue::from_static(host));
        }
        MessageHead {
            version: Version::HTTP_11,
            subject: RequestLine(Method::GET, uri.parse().unwrap()),
            headers,
        }
    }

    #[test]
    fn ingress_injects_request_line_keys() {
        let view = ingress_request(&parsed_get("/a/b?x=y", Some("svc.local")));
        assert_eq!(view.headers()[&INTERNAL_HOST], "svc.local");
        assert_eq!(view.headers()[&INTERNAL_AUTHORITY], "svc.local");
        assert_eq!(view.headers()[&INTERNAL_METHOD], "GET");
        assert_eq!(view.headers()[&INTERNAL_PATH], "/a/b");
        assert_eq!(view.headers()[&INTERNAL_QUERYSTRING], "x=y");
    }

    #[test]
    fn ingress_skips_empty_query() {
        let view = ingress_request(&parsed_get("/plain", Some("h")));
        assert!(view.get(&INTERNAL_QUERYSTRING).is_none());
    }

    #[test]
    fn egress_round_trips_request_line() {
        let view = ingress_request(&parsed_get("/x", Some("h")));
        let head = egress_request(view.into_headers(), true, None).expect("egress");
        assert_eq!(head.subject.0, Method::GET);
        assert_eq!(head.subject.1.path(), "/x");
        assert_eq!(head.headers[HOST], "h");

        let wire = encode_request(&head, b"");
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("GET /x HTTP/1.1\r\n"));
        assert!(text.contains("host: h\r\n"));
        assert!(!text.contains("mosn"));
        assert!(!text.contains("istio"));
    }

    #[test]
    fn egress_defaults_method_by_end_stream() {
        let head = egress_request(HeaderMap::new(), true, None).unwrap();
        assert_eq!(head.subject.0, Method::GET);
        assert_eq!(head.subject.1.path(), "/");

        let head = egress_request(HeaderMap::new(), false, None).unwrap();
        assert_eq!(head.subject.0, Method::POST);
    }

    #[test]
    fn egress_falls_back_to_remote_addr_host() {
        let addr: SocketAddr = "10.0.0.7:8080".parse().unwrap();
        let head = egress_request(HeaderMap::new(), true, Some(addr)).unwrap();
        assert_eq!(head.headers[HOST], "10.0.0.7:8080");
    }

    #[test]
    fn status_key_parses_or_degrades_to_zero() {
        let mut map = HeaderMap::new();
        map.insert(INTERNAL_STATUS, HeaderValue::from_static("502"));
        assert_eq!(take_status(&mut map), 502);
        assert!(map.get(&INTERNAL_STATUS).is_none());

        map.insert(INTERNAL_STATUS, HeaderValue::from_static("teapot"));
        assert_eq!(take_status(&mut map), 0);

        assert_eq!(take_status(&mut HeaderMap::new()), 0);
    }

    #[test]
    fn close_semantics_by_version() {
        let mut head = parsed_get("/", None);
        assert!(!wants_close(&head));

        head.headers
            .insert(CONNECTION, HeaderValue::from_static("close"));
        assert!(wants_close(&head));

        let mut head10 = parsed_get("/", None);
        head10.version = Version::HTTP_10;
        assert!(wants_close(&head10));
        head10
            .headers
            .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!wants_close(&head10));
    }
}
