//! Static header names and values used when rewriting responses.
//!
//! Built with `from_static`, so inserting them never fails at runtime and
//! cloning is a pointer copy.

use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;

/// Cookie that switches the upstream between its mobile and desktop layout.
pub const OVERRIDE_MOBILE_DETECT: &str = "override-mobile-detect";

pub static VALUE_IDENTITY: HeaderValue = HeaderValue::from_static("identity");
pub static VALUE_CLOSE: HeaderValue = HeaderValue::from_static("close");
pub static VALUE_KEEP_ALIVE: HeaderValue = HeaderValue::from_static("keep-alive");
pub static VALUE_MOBILE_ON: HeaderValue =
    HeaderValue::from_static("override-mobile-detect=1");
pub static VALUE_MOBILE_OFF: HeaderValue =
    HeaderValue::from_static("override-mobile-detect=0");

/// Expected value of [`OVERRIDE_MOBILE_DETECT`] for a mode.
pub fn mobile_cookie_value(mobile_mode: bool) -> &'static str {
    if mobile_mode {
        "1"
    } else {
        "0"
    }
}

/// Complete `Set-Cookie` value for a mode.
pub fn mobile_set_cookie(mobile_mode: bool) -> &'static HeaderValue {
    if mobile_mode {
        &VALUE_MOBILE_ON
    } else {
        &VALUE_MOBILE_OFF
    }
}

/// First value of `name` as text, if present and visible ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::CONTENT_TYPE;

    #[test]
    fn test_static_header_values() {
        assert_eq!(VALUE_IDENTITY.to_str().unwrap(), "identity");
        assert_eq!(VALUE_CLOSE.to_str().unwrap(), "close");
        assert_eq!(VALUE_KEEP_ALIVE.to_str().unwrap(), "keep-alive");
    }

    #[test]
    fn test_mobile_cookie() {
        assert_eq!(mobile_cookie_value(true), "1");
        assert_eq!(mobile_cookie_value(false), "0");
        assert_eq!(mobile_set_cookie(true), "override-mobile-detect=1");
        assert_eq!(mobile_set_cookie(false), "override-mobile-detect=0");
    }

    #[test]
    fn test_header_str() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_str(&headers, &CONTENT_TYPE), None);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        assert_eq!(header_str(&headers, &CONTENT_TYPE), Some("text/html"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_bytes(b"caf\xe9").unwrap());
        assert_eq!(header_str(&headers, &CONTENT_TYPE), None);
    }
}
