//! Fixture fingerprinting.
//!
//! A fixture id is a pure function of a request's defining attributes:
//! `METHOD:hash(href):hash(headerSubset):hash(bodyDigest):hash(trailerSubset)`.
//! Headers outside the canonical subset (authorization tokens, user agents,
//! request ids) are deliberately excluded so functionally identical requests
//! always resolve to the same fixture.

use hyper::header::HeaderMap;
use hyper::Method;
use sha2::{Digest, Sha256};
use xxhash_rust::xxh32::xxh32;

/// The canonical header subset that participates in a fingerprint.
pub const HEADER_SUBSET: [&str; 7] = [
    "host",
    "accept",
    "cookie",
    "accept-encoding",
    "accept-language",
    "content-type",
    "content-length",
];

/// Fast stable hash of a string, rendered as uppercase hex.
pub fn hash_str(value: &str) -> String {
    format!("{:X}", xxh32(value.as_bytes(), 0))
}

/// Hash of the canonical header subset, joined by `:`. Absent headers
/// contribute an empty segment so presence alone cannot shift fields.
/// Repeated headers fold into a single value the way an HTTP/1 client
/// combines them on the wire: `; ` for cookies, `, ` for everything else.
pub fn hash_headers(headers: &HeaderMap) -> String {
    let joined = HEADER_SUBSET
        .iter()
        .map(|name| {
            let sep = if *name == "cookie" { "; " } else { ", " };
            headers
                .get_all(*name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(sep)
        })
        .collect::<Vec<_>>()
        .join(":");
    hash_str(&joined)
}

/// Uppercase-hex SHA-256 of a fully buffered body.
pub fn body_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    digest_hex(hasher)
}

/// Render a finished SHA-256 state as uppercase hex.
pub fn digest_hex(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect()
}

/// Compose the fixture id from a request's defining attributes.
pub fn fixture_id(
    method: &Method,
    href: &str,
    headers: &HeaderMap,
    body_digest_hex: &str,
    trailers: &HeaderMap,
) -> String {
    [
        method.as_str().to_string(),
        hash_str(href),
        hash_headers(headers),
        hash_str(body_digest_hex),
        hash_headers(trailers),
    ]
    .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_id_deterministic() {
        let h = headers(&[("host", "api.example.com"), ("accept", "*/*")]);
        let digest = body_digest(b"payload");
        let a = fixture_id(&Method::POST, "http://api.example.com/v1", &h, &digest, &HeaderMap::new());
        let b = fixture_id(&Method::POST, "http://api.example.com/v1", &h, &digest, &HeaderMap::new());
        assert_eq!(a, b);
    }

    #[test]
    fn test_out_of_subset_headers_do_not_change_id() {
        let base = headers(&[("host", "api.example.com"), ("accept", "*/*")]);
        let noisy = headers(&[
            ("host", "api.example.com"),
            ("accept", "*/*"),
            ("user-agent", "curl/8.0"),
            ("authorization", "Bearer deadbeef"),
            ("x-request-id", "abc-123"),
        ]);
        let digest = body_digest(b"");
        let a = fixture_id(&Method::GET, "http://api.example.com/", &base, &digest, &HeaderMap::new());
        let b = fixture_id(&Method::GET, "http://api.example.com/", &noisy, &digest, &HeaderMap::new());
        assert_eq!(a, b);
    }

    #[test]
    fn test_header_order_irrelevant() {
        let a = headers(&[("accept", "*/*"), ("host", "h"), ("cookie", "k=v")]);
        let b = headers(&[("cookie", "k=v"), ("accept", "*/*"), ("host", "h")]);
        assert_eq!(hash_headers(&a), hash_headers(&b));
    }

    #[test]
    fn test_repeated_subset_headers_all_participate() {
        let a = headers(&[("cookie", "session=1"), ("cookie", "user=alice")]);
        let b = headers(&[("cookie", "session=1"), ("cookie", "user=bob")]);
        assert_ne!(hash_headers(&a), hash_headers(&b));
    }

    #[test]
    fn test_repeated_headers_fold_like_the_wire() {
        let split = headers(&[("cookie", "session=1"), ("cookie", "user=alice")]);
        let folded = headers(&[("cookie", "session=1; user=alice")]);
        assert_eq!(hash_headers(&split), hash_headers(&folded));

        let split = headers(&[("accept", "text/html"), ("accept", "application/json")]);
        let folded = headers(&[("accept", "text/html, application/json")]);
        assert_eq!(hash_headers(&split), hash_headers(&folded));
    }

    #[test]
    fn test_subset_value_changes_id() {
        let a = headers(&[("cookie", "session=1")]);
        let b = headers(&[("cookie", "session=2")]);
        assert_ne!(hash_headers(&a), hash_headers(&b));
    }

    #[test]
    fn test_body_changes_id() {
        let h = HeaderMap::new();
        let a = fixture_id(&Method::POST, "http://x/", &h, &body_digest(b"one"), &h);
        let b = fixture_id(&Method::POST, "http://x/", &h, &body_digest(b"two"), &h);
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_shape() {
        let h = HeaderMap::new();
        let id = fixture_id(&Method::GET, "http://x/", &h, &body_digest(b""), &h);
        let parts: Vec<_> = id.split(':').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "GET");
    }

    #[test]
    fn test_body_digest_uppercase_hex() {
        let digest = body_digest(b"hello");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
