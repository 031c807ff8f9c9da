use std::cmp;

use crate::registry::MatchResult;

const MIN_METHOD_LENGTH: usize = 3;
const MAX_METHOD_LENGTH: usize = 7;

// The closed set of tokens that can begin an HTTP/1 message. Lowercase is
// not HTTP/1.
const METHODS: [&[u8]; 8] = [
    b"OPTIONS", b"GET", b"HEAD", b"POST", b"PUT", b"DELETE", b"TRACE", b"CONNECT",
];

/// Decides whether the initial bytes of a fresh connection are HTTP/1.
///
/// Every prefix length from the shortest method token up to the longest (or
/// as far as `magic` reaches) is tried against the set; a shorter `magic`
/// that has not failed yet asks the caller to wait for more bytes.
pub(crate) fn protocol_match(magic: &[u8]) -> MatchResult {
    if magic.len() < MIN_METHOD_LENGTH {
        return MatchResult::Again;
    }
    let upper = cmp::min(magic.len(), MAX_METHOD_LENGTH);
    for len in MIN_METHOD_LENGTH..=upper {
        let prefix = &magic[..len];
        if METHODS.iter().any(|method| *method == prefix) {
            return MatchResult::Match;
        }
    }
    if magic.len() < MAX_METHOD_LENGTH {
        MatchResult::Again
    } else {
        MatchResult::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_method_token_matches() {
        for method in METHODS.iter() {
            assert_eq!(protocol_match(method), MatchResult::Match, "{:?}", method);
        }
    }

    #[test]
    fn methods_match_with_trailing_bytes() {
        assert_eq!(protocol_match(b"GET / HTTP/1.1\r\n"), MatchResult::Match);
        assert_eq!(protocol_match(b"DELETE /x HTTP/1.0"), MatchResult::Match);
    }

    #[test]
    fn short_prefixes_ask_for_more() {
        assert_eq!(protocol_match(b""), MatchResult::Again);
        assert_eq!(protocol_match(b"GE"), MatchResult::Again);
        assert_eq!(protocol_match(b"OPTI"), MatchResult::Again);
    }

    #[test]
    fn long_garbage_fails() {
        assert_eq!(protocol_match(b"XYZZYZA"), MatchResult::Fail);
        assert_eq!(protocol_match(b"PRI * HTTP/2.0"), MatchResult::Fail);
    }

    #[test]
    fn lowercase_is_not_http1() {
        assert_eq!(protocol_match(b"get / HTTP/1.1"), MatchResult::Fail);
    }
}
