//! Header-mutation passes.
//!
//! Each phase is an ordered list of values implementing a single mutate
//! capability; all passes in a phase share one mutable per-request context
//! and receive an immutable snapshot of the instance flags. Execution
//! order is registration order and is significant.
//!
//! - Outbound passes run before the remote request is issued.
//! - Inbound passes run after remote headers arrive, before they flush.
//! - Replay passes run after fixture headers are copied, before flush.

use crate::config::Flags;
use crate::fixture::FixtureMeta;
use chrono::{DateTime, Duration, Utc};
use cookie::time::OffsetDateTime;
use cookie::{Cookie, Expiration};
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, DATE, EXPIRES,
    IF_MODIFIED_SINCE, IF_NONE_MATCH, PRAGMA, SET_COOKIE, VIA,
};
use hyper::{Method, Version};
use std::net::SocketAddr;

use crate::proxy::options::RequestOptions;

/// Shared context for outbound passes: the request options about to be
/// turned into the forwarding request.
pub struct OutboundCx<'a> {
    pub peer: Option<SocketAddr>,
    pub version: Version,
    pub options: &'a mut RequestOptions,
}

pub trait OutboundPass: Send + Sync {
    fn mutate(&self, cx: &mut OutboundCx<'_>, flags: &Flags);
}

/// Shared context for inbound passes: the local response headers being
/// prepared, alongside the untouched remote headers.
pub struct InboundCx<'a> {
    pub peer: Option<SocketAddr>,
    pub scheme: &'static str,
    pub remote_headers: &'a HeaderMap,
    pub headers: &'a mut HeaderMap,
}

pub trait InboundPass: Send + Sync {
    fn mutate(&self, cx: &mut InboundCx<'_>, flags: &Flags);
}

/// Shared context for replay passes: headers copied from the fixture,
/// plus the fixture metadata they came from.
pub struct ReplayCx<'a> {
    pub meta: &'a FixtureMeta,
    pub headers: &'a mut HeaderMap,
}

pub trait ReplayPass: Send + Sync {
    fn mutate(&self, cx: &mut ReplayCx<'_>, flags: &Flags);
}

/// The three pass phases of a proxy instance, in execution order.
pub struct PassSet {
    pub outbound: Vec<Box<dyn OutboundPass>>,
    pub inbound: Vec<Box<dyn InboundPass>>,
    pub replay: Vec<Box<dyn ReplayPass>>,
}

impl Default for PassSet {
    fn default() -> Self {
        Self {
            outbound: vec![
                Box::new(Via),
                Box::new(OutboundCacheControl),
                Box::new(KeepAlive),
                Box::new(BodylessContentLength),
            ],
            inbound: vec![Box::new(ForceRevalidate), Box::new(ForwardedFor)],
            replay: vec![
                Box::new(FreshDate),
                Box::new(ShiftExpires),
                Box::new(ShiftCookieExpires),
            ],
        }
    }
}

fn append_to(headers: &mut HeaderMap, name: HeaderName, addition: &str) {
    let combined = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {addition}"),
        _ => addition.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&combined) {
        headers.insert(name, value);
    }
}

fn http_date(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn recorded_date(meta: &FixtureMeta) -> Option<DateTime<Utc>> {
    meta.response
        .headers
        .get("date")
        .and_then(|v| v.as_str())
        .and_then(parse_http_date)
}

// ===== Outbound =====

/// Appends this proxy to the `Via` chain.
pub struct Via;

impl OutboundPass for Via {
    fn mutate(&self, cx: &mut OutboundCx<'_>, _flags: &Flags) {
        let protocol = match cx.version {
            Version::HTTP_10 => "1.0",
            Version::HTTP_2 => "2.0",
            _ => "1.1",
        };
        append_to(&mut cx.options.headers, VIA, &format!("{protocol} refract"));
    }
}

/// When `no_cache` is set, forces end-to-end revalidation by stripping
/// conditional validators from the outbound request.
pub struct OutboundCacheControl;

impl OutboundPass for OutboundCacheControl {
    fn mutate(&self, cx: &mut OutboundCx<'_>, flags: &Flags) {
        if !flags.no_cache {
            return;
        }
        let headers = &mut cx.options.headers;
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.remove(IF_MODIFIED_SINCE);
        headers.remove(IF_NONE_MATCH);
    }
}

/// Keeps outbound connections reusable across requests.
pub struct KeepAlive;

impl OutboundPass for KeepAlive {
    fn mutate(&self, cx: &mut OutboundCx<'_>, _flags: &Flags) {
        cx.options
            .headers
            .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    }
}

/// DELETE and OPTIONS requests without a declared length get an explicit
/// `content-length: 0`; some origins reject them otherwise.
pub struct BodylessContentLength;

impl OutboundPass for BodylessContentLength {
    fn mutate(&self, cx: &mut OutboundCx<'_>, _flags: &Flags) {
        let method = &cx.options.method;
        if (*method == Method::DELETE || *method == Method::OPTIONS)
            && !cx.options.headers.contains_key(CONTENT_LENGTH)
        {
            cx.options
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
    }
}

// ===== Inbound =====

/// When `no_cache` is set, the client must revalidate what it caches.
pub struct ForceRevalidate;

impl InboundPass for ForceRevalidate {
    fn mutate(&self, cx: &mut InboundCx<'_>, flags: &Flags) {
        if flags.no_cache {
            cx.headers.insert(
                CACHE_CONTROL,
                HeaderValue::from_static("max-age=0, private, must-revalidate"),
            );
        }
    }
}

/// Appends the client to the `X-Forwarded-{For,Port,Proto}` chains.
pub struct ForwardedFor;

impl InboundPass for ForwardedFor {
    fn mutate(&self, cx: &mut InboundCx<'_>, _flags: &Flags) {
        let Some(peer) = cx.peer else {
            return;
        };
        let fields = [
            ("x-forwarded-for", peer.ip().to_string()),
            ("x-forwarded-port", peer.port().to_string()),
            ("x-forwarded-proto", cx.scheme.to_string()),
        ];
        for (name, addition) in fields {
            let Ok(name) = name.parse::<HeaderName>() else {
                continue;
            };
            let combined = match cx.remote_headers.get(&name).and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.is_empty() => format!("{existing}, {addition}"),
                _ => addition,
            };
            if let Ok(value) = HeaderValue::from_str(&combined) {
                cx.headers.insert(name, value);
            }
        }
    }
}

// ===== Replay =====

/// Regenerates `Date` so replayed responses are dated at replay time.
pub struct FreshDate;

impl ReplayPass for FreshDate {
    fn mutate(&self, cx: &mut ReplayCx<'_>, _flags: &Flags) {
        cx.headers.remove(DATE);
        if let Ok(value) = HeaderValue::from_str(&http_date(Utc::now())) {
            cx.headers.insert(DATE, value);
        }
    }
}

/// Shifts `Expires` by the original record-time-to-expiry delta, keeping
/// replayed content temporally consistent instead of stale.
pub struct ShiftExpires;

impl ReplayPass for ShiftExpires {
    fn mutate(&self, cx: &mut ReplayCx<'_>, _flags: &Flags) {
        let Some(expires) = cx
            .headers
            .get(EXPIRES)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
        else {
            return;
        };
        let Some(recorded) = recorded_date(cx.meta) else {
            return;
        };
        let delta: Duration = expires - recorded;
        let updated = Utc::now() + delta;
        cx.headers.remove(EXPIRES);
        if let Ok(value) = HeaderValue::from_str(&http_date(updated)) {
            cx.headers.insert(EXPIRES, value);
        }
    }
}

/// Shifts cookie `expires` attributes by the record-time delta.
pub struct ShiftCookieExpires;

impl ReplayPass for ShiftCookieExpires {
    fn mutate(&self, cx: &mut ReplayCx<'_>, _flags: &Flags) {
        let Some(recorded) = recorded_date(cx.meta) else {
            return;
        };
        let recorded_ts = recorded.timestamp();
        let now_ts = Utc::now().timestamp();

        let rewritten: Vec<String> = cx
            .headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|header| shift_cookie(header, recorded_ts, now_ts))
            .collect();
        if rewritten.is_empty() {
            return;
        }

        cx.headers.remove(SET_COOKIE);
        for header in rewritten {
            if let Ok(value) = HeaderValue::from_str(&header) {
                cx.headers.append(SET_COOKIE, value);
            }
        }
    }
}

fn shift_cookie(header: &str, recorded_ts: i64, now_ts: i64) -> String {
    let Ok(mut parsed) = Cookie::parse(header.to_owned()) else {
        return header.to_string();
    };
    if let Some(Expiration::DateTime(expires)) = parsed.expires() {
        let delta = expires.unix_timestamp() - recorded_ts;
        if let Ok(updated) = OffsetDateTime::from_unix_timestamp(now_ts + delta) {
            parsed.set_expires(updated);
        }
    }
    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureRequest, FixtureResponse};
    use crate::proxy::options::PoolKind;
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn flags() -> Flags {
        Flags {
            mitm: false,
            record: false,
            replay: false,
            no_cache: false,
            enable_network: true,
            ignore_local: false,
        }
    }

    fn options(method: Method) -> RequestOptions {
        RequestOptions {
            scheme: "http",
            host: "example.com".to_string(),
            port: 80,
            path: "/".to_string(),
            method,
            headers: HeaderMap::new(),
            pool: PoolKind::Plain,
        }
    }

    fn meta_with_headers(headers: BTreeMap<String, Value>) -> FixtureMeta {
        FixtureMeta {
            id: "id".to_string(),
            request: FixtureRequest {
                method: "GET".to_string(),
                href: "http://example.com/".to_string(),
                headers: BTreeMap::new(),
                trailers: BTreeMap::new(),
                body: String::new(),
            },
            response: FixtureResponse {
                status_code: 200,
                status_message: "OK".to_string(),
                href: "http://example.com/".to_string(),
                headers,
                trailers: BTreeMap::new(),
                body: String::new(),
            },
        }
    }

    #[test]
    fn test_via_appends() {
        let mut opts = options(Method::GET);
        opts.headers
            .insert(VIA, HeaderValue::from_static("1.0 upstream"));
        let mut cx = OutboundCx {
            peer: None,
            version: Version::HTTP_11,
            options: &mut opts,
        };
        Via.mutate(&mut cx, &flags());
        assert_eq!(opts.headers.get(VIA).unwrap(), "1.0 upstream, 1.1 refract");
    }

    #[test]
    fn test_no_cache_strips_validators() {
        let mut opts = options(Method::GET);
        opts.headers
            .insert(IF_NONE_MATCH, HeaderValue::from_static("\"etag\""));
        let mut f = flags();
        f.no_cache = true;
        let mut cx = OutboundCx {
            peer: None,
            version: Version::HTTP_11,
            options: &mut opts,
        };
        OutboundCacheControl.mutate(&mut cx, &f);
        assert!(opts.headers.get(IF_NONE_MATCH).is_none());
        assert_eq!(opts.headers.get(CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(opts.headers.get(PRAGMA).unwrap(), "no-cache");
    }

    #[test]
    fn test_bodyless_content_length_only_for_delete_options() {
        let mut opts = options(Method::DELETE);
        let mut cx = OutboundCx {
            peer: None,
            version: Version::HTTP_11,
            options: &mut opts,
        };
        BodylessContentLength.mutate(&mut cx, &flags());
        assert_eq!(opts.headers.get(CONTENT_LENGTH).unwrap(), "0");

        let mut opts = options(Method::POST);
        let mut cx = OutboundCx {
            peer: None,
            version: Version::HTTP_11,
            options: &mut opts,
        };
        BodylessContentLength.mutate(&mut cx, &flags());
        assert!(opts.headers.get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_forwarded_for_appends_to_remote_chain() {
        let peer: SocketAddr = "10.0.0.5:51000".parse().unwrap();
        let mut remote = HeaderMap::new();
        remote.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1"),
        );
        let mut headers = HeaderMap::new();
        let mut cx = InboundCx {
            peer: Some(peer),
            scheme: "https",
            remote_headers: &remote,
            headers: &mut headers,
        };
        ForwardedFor.mutate(&mut cx, &flags());
        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "192.168.1.1, 10.0.0.5"
        );
        assert_eq!(headers.get("x-forwarded-port").unwrap(), "51000");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
    }

    #[test]
    fn test_fresh_date_replaces_recorded_date() {
        let meta = meta_with_headers(BTreeMap::new());
        let mut headers = HeaderMap::new();
        headers.insert(DATE, HeaderValue::from_static("Tue, 15 Nov 1994 08:12:31 GMT"));
        let mut cx = ReplayCx {
            meta: &meta,
            headers: &mut headers,
        };
        FreshDate.mutate(&mut cx, &flags());
        let date = parse_http_date(headers.get(DATE).unwrap().to_str().unwrap()).unwrap();
        assert!((Utc::now() - date).num_seconds().abs() < 5);
    }

    #[test]
    fn test_shift_expires_preserves_delta() {
        let recorded = Utc::now() - Duration::days(30);
        let expires = recorded + Duration::hours(1);

        let mut meta_headers = BTreeMap::new();
        meta_headers.insert("date".to_string(), Value::String(http_date(recorded)));
        let meta = meta_with_headers(meta_headers);

        let mut headers = HeaderMap::new();
        headers.insert(EXPIRES, HeaderValue::from_str(&http_date(expires)).unwrap());
        let mut cx = ReplayCx {
            meta: &meta,
            headers: &mut headers,
        };
        ShiftExpires.mutate(&mut cx, &flags());

        let updated = parse_http_date(headers.get(EXPIRES).unwrap().to_str().unwrap()).unwrap();
        let delta = updated - Utc::now();
        assert!((delta - Duration::hours(1)).num_seconds().abs() < 5);
    }

    #[test]
    fn test_shift_cookie_expires() {
        let recorded = Utc::now() - Duration::days(7);
        let cookie_expires = recorded + Duration::days(14);

        let mut meta_headers = BTreeMap::new();
        meta_headers.insert("date".to_string(), Value::String(http_date(recorded)));
        let meta = meta_with_headers(meta_headers);

        let header = format!(
            "session=abc; Path=/; Expires={}",
            http_date(cookie_expires)
        );
        let mut headers = HeaderMap::new();
        headers.insert(SET_COOKIE, HeaderValue::from_str(&header).unwrap());
        let mut cx = ReplayCx {
            meta: &meta,
            headers: &mut headers,
        };
        ShiftCookieExpires.mutate(&mut cx, &flags());

        let rewritten = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        let parsed = Cookie::parse(rewritten.to_owned()).unwrap();
        assert_eq!(parsed.name(), "session");
        let Some(Expiration::DateTime(updated)) = parsed.expires() else {
            panic!("expires attribute lost");
        };
        let delta_secs = updated.unix_timestamp() - Utc::now().timestamp();
        let fourteen_days = 14 * 24 * 3600;
        assert!((delta_secs - fourteen_days).abs() < 5);
    }

    #[test]
    fn test_cookie_without_expires_untouched() {
        let shifted = shift_cookie("plain=1; Path=/", 0, 1_000_000);
        assert!(shifted.starts_with("plain=1"));
        assert!(!shifted.to_ascii_lowercase().contains("expires"));
    }
}
