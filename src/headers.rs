//! Header views and the reserved internal header keys.
//!
//! The proxy's routing layer sees every message as a header map plus body
//! bytes. Request-line and status information survives that flattening via a
//! small set of reserved in-process keys: injected at ingress, removed at
//! egress, never sent on the wire.

use http::header::{HeaderName, HeaderValue, ValueIter, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::HeaderMap;

/// Request URI host, as seen by routing.
pub const INTERNAL_HOST: HeaderName = HeaderName::from_static("mosn-host");
/// `:authority` equivalent, mirrored from the host for mesh interop.
pub const INTERNAL_AUTHORITY: HeaderName = HeaderName::from_static("istio-authority");
/// HTTP request method.
pub const INTERNAL_METHOD: HeaderName = HeaderName::from_static("mosn-method");
/// Request URI path.
pub const INTERNAL_PATH: HeaderName = HeaderName::from_static("mosn-path");
/// Request URI query string, only present when non-empty.
pub const INTERNAL_QUERYSTRING: HeaderName = HeaderName::from_static("mosn-querystring");
/// Response status code.
pub const INTERNAL_STATUS: HeaderName = HeaderName::from_static("x-mosn-status");

pub(crate) const ALL_INTERNAL_KEYS: [HeaderName; 6] = [
    INTERNAL_HOST,
    INTERNAL_AUTHORITY,
    INTERNAL_METHOD,
    INTERNAL_PATH,
    INTERNAL_QUERYSTRING,
    INTERNAL_STATUS,
];

pub(crate) fn is_internal_key(name: &HeaderName) -> bool {
    ALL_INTERNAL_KEYS.iter().any(|key| key == name)
}

pub(crate) fn remove_internal_keys(headers: &mut HeaderMap) {
    for key in ALL_INTERNAL_KEYS.iter() {
        headers.remove(key);
    }
}

/// Request headers as handed across the proxy boundary.
///
/// The map is an owned copy; it does not borrow the parser's buffers, so it
/// may be retained past message recycling.
#[derive(Debug, Clone, Default)]
pub struct RequestHeader {
    headers: HeaderMap,
}

/// Response headers as handed across the proxy boundary.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeader {
    headers: HeaderMap,
}

macro_rules! impl_header_view {
    ($view:ident) => {
        impl $view {
            pub fn new(headers: HeaderMap) -> $view {
                $view { headers }
            }

            pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
                self.headers.get(name)
            }

            pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
                self.headers.insert(name, value);
            }

            pub fn remove(&mut self, name: &HeaderName) -> Option<HeaderValue> {
                self.headers.remove(name)
            }

            pub fn headers(&self) -> &HeaderMap {
                &self.headers
            }

            pub fn headers_mut(&mut self) -> &mut HeaderMap {
                &mut self.headers
            }

            pub fn into_headers(self) -> HeaderMap {
                self.headers
            }
        }
    };
}

impl_header_view!(RequestHeader);
impl_header_view!(ResponseHeader);

/// The two shapes `append_headers` accepts.
///
/// A server stream normally receives a response-header frame; receiving a
/// request-header frame means the proxy hijacked the stream and the request
/// headers double as the response.
#[derive(Debug, Clone)]
pub enum HeaderFrame {
    Request(RequestHeader),
    Response(ResponseHeader),
}

impl HeaderFrame {
    pub fn headers(&self) -> &HeaderMap {
        match self {
            HeaderFrame::Request(req) => req.headers(),
            HeaderFrame::Response(resp) => resp.headers(),
        }
    }

    pub fn into_headers(self) -> HeaderMap {
        match self {
            HeaderFrame::Request(req) => req.into_headers(),
            HeaderFrame::Response(resp) => resp.into_headers(),
        }
    }
}

impl From<RequestHeader> for HeaderFrame {
    fn from(req: RequestHeader) -> HeaderFrame {
        HeaderFrame::Request(req)
    }
}

impl From<ResponseHeader> for HeaderFrame {
    fn from(resp: ResponseHeader) -> HeaderFrame {
        HeaderFrame::Response(resp)
    }
}

pub(crate) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

pub(crate) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

pub(crate) fn content_length_parse_all(headers: &HeaderMap) -> Option<u64> {
    content_length_parse_all_values(headers.get_all(CONTENT_LENGTH).into_iter())
}

pub(crate) fn content_length_parse_all_values(values: ValueIter<'_, HeaderValue>) -> Option<u64> {
    // If multiple Content-Length headers were sent, everything can still
    // be alright if they all contain the same value, and all parse
    // correctly. If not, then it's an error.

    let folded = values.fold(None, |prev, line| match prev {
        Some(Ok(prev)) => Some(
            line.to_str()
                .map_err(|_| ())
                .and_then(|s| s.parse().map_err(|_| ()))
                .and_then(|n| if prev == n { Ok(n) } else { Err(()) }),
        ),
        None => Some(
            line.to_str()
                .map_err(|_| ())
                .and_then(|s| s.parse().map_err(|_| ())),
        ),
        Some(Err(())) => Some(Err(())),
    });

    if let Some(Ok(n)) = folded {
        Some(n)
    } else {
        None
    }
}

pub(crate) fn transfer_encoding_is_chunked(headers: &HeaderMap) -> bool {
    is_chunked(headers.get_all(TRANSFER_ENCODING).into_iter())
}

pub(crate) fn is_chunked(mut encodings: ValueIter<'_, HeaderValue>) -> bool {
    // chunked must always be the last encoding, according to spec
    if let Some(line) = encodings.next_back() {
        if let Ok(s) = line.to_str() {
            if let Some(encoding) = s.rsplit(',').next() {
                return encoding.trim().eq_ignore_ascii_case("chunked");
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_values_are_comma_lists() {
        let value = HeaderValue::from_static("Upgrade, Keep-Alive");
        assert!(connection_keep_alive(&value));
        assert!(!connection_close(&value));
        assert!(connection_close(&HeaderValue::from_static("close")));
    }

    #[test]
    fn content_length_disagreement_is_none() {
        let mut headers = HeaderMap::new();
        headers.append(CONTENT_LENGTH, HeaderValue::from_static("5"));
        headers.append(CONTENT_LENGTH, HeaderValue::from_static("5"));
        assert_eq!(content_length_parse_all(&headers), Some(5));

        headers.append(CONTENT_LENGTH, HeaderValue::from_static("6"));
        assert_eq!(content_length_parse_all(&headers), None);
    }

    #[test]
    fn chunked_must_be_last_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip, chunked"));
        assert!(transfer_encoding_is_chunked(&headers));

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked, gzip"));
        assert!(!transfer_encoding_is_chunked(&headers));
    }

    #[test]
    fn internal_keys_are_recognized() {
        assert!(is_internal_key(&INTERNAL_STATUS));
        assert!(!is_internal_key(&http::header::HOST));
    }
}
