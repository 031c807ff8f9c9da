use std::cell::RefCell;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;

// "Sun, 06 Nov 1994 08:49:37 GMT".len()
pub(crate) const DATE_VALUE_LENGTH: usize = 29;

/// Appends the current HTTP-date, refreshed at one-second granularity.
pub(crate) fn extend(dst: &mut BytesMut) {
    CACHED.with(|cache| {
        let mut cache = cache.borrow_mut();
        cache.check();
        dst.extend_from_slice(cache.buffer());
    })
}

struct CachedDate {
    bytes: [u8; DATE_VALUE_LENGTH],
    rendered_second: u64,
}

thread_local!(static CACHED: RefCell<CachedDate> = RefCell::new(CachedDate::new()));

impl CachedDate {
    fn new() -> Self {
        let mut cache = CachedDate {
            bytes: [0; DATE_VALUE_LENGTH],
            rendered_second: 0,
        };
        cache.render(SystemTime::now());
        cache
    }

    fn buffer(&self) -> &[u8] {
        &self.bytes[..]
    }

    fn check(&mut self) {
        let now = SystemTime::now();
        if unix_second(now) != self.rendered_second {
            self.render(now);
        }
    }

    fn render(&mut self, now: SystemTime) {
        let rendered = httpdate::fmt_http_date(now);
        debug_assert!(rendered.len() == DATE_VALUE_LENGTH);
        self.bytes.copy_from_slice(rendered.as_bytes());
        self.rendered_second = unix_second(now);
    }
}

fn unix_second(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_len() {
        assert_eq!(DATE_VALUE_LENGTH, "Sun, 06 Nov 1994 08:49:37 GMT".len());
    }

    #[test]
    fn test_date_is_valid_http_date() {
        let mut buf = BytesMut::new();
        extend(&mut buf);
        let rendered = std::str::from_utf8(&buf).unwrap();
        assert!(httpdate::parse_http_date(rendered).is_ok(), "{:?}", rendered);
    }
}
