//! Per-request forwarding target derived from the inbound request head.

use crate::error::ProxyError;
use hyper::header::HOST;
use hyper::http::request::Parts;
use hyper::http::uri::Uri;
use hyper::{HeaderMap, Method};
use std::net::IpAddr;

/// Which outbound connection pool serves this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Plain,
    Tls,
}

/// Everything needed to issue the outbound request: target, method and
/// the header set the outbound passes mutate in place.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub scheme: &'static str,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub pool: PoolKind,
}

impl RequestOptions {
    /// Resolves the forwarding target from the request head.
    ///
    /// Absolute-form URIs (the plaintext proxy protocol) carry their own
    /// authority; origin-form requests (seen on terminated tunnels) fall
    /// back to the `Host` header. `encrypted` marks requests that arrived
    /// through a terminated TLS tunnel.
    pub fn from_parts(parts: &Parts, encrypted: bool) -> Result<Self, ProxyError> {
        let (scheme, default_port, pool) = if encrypted {
            ("https", 443, PoolKind::Tls)
        } else {
            ("http", 80, PoolKind::Plain)
        };

        let (host, port) = match parts.uri.authority() {
            Some(authority) => (
                authority.host().to_string(),
                authority.port_u16().unwrap_or(default_port),
            ),
            None => {
                let raw = parts
                    .headers
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        ProxyError::InvalidRequest("request carries no host".to_string())
                    })?;
                split_host_port(raw, default_port)?
            }
        };

        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            scheme,
            host,
            port,
            path,
            method: parts.method.clone(),
            headers: parts.headers.clone(),
            pool,
        })
    }

    /// Canonical URL of the target, omitting default ports.
    pub fn href(&self) -> String {
        let default_port = match self.scheme {
            "https" => 443,
            _ => 80,
        };
        if self.port == default_port {
            format!("{}://{}{}", self.scheme, self.host, self.path)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
        }
    }

    /// The absolute URI handed to the outbound pool.
    pub fn uri(&self) -> Result<Uri, ProxyError> {
        self.href()
            .parse::<Uri>()
            .map_err(|e| ProxyError::InvalidRequest(format!("unroutable target: {e}")))
    }

    /// True when the target is this machine.
    pub fn is_local(&self) -> bool {
        let bare = self.host.trim_start_matches('[').trim_end_matches(']');
        if bare.eq_ignore_ascii_case("localhost") {
            return true;
        }
        bare.parse::<IpAddr>().map_or(false, |ip| ip.is_loopback())
    }
}

/// Splits a `Host` header value into host and port, keeping IPv6
/// brackets on the host.
fn split_host_port(raw: &str, default_port: u16) -> Result<(String, u16), ProxyError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ProxyError::InvalidRequest("empty host".to_string()));
    }

    let (host, port_part) = if raw.starts_with('[') {
        match raw.find(']') {
            Some(end) => (&raw[..=end], raw[end + 1..].strip_prefix(':')),
            None => {
                return Err(ProxyError::InvalidRequest(format!(
                    "unbalanced ipv6 host: {raw}"
                )))
            }
        }
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (raw, None),
        }
    };

    let port = match port_part {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| ProxyError::InvalidRequest(format!("invalid port in host: {raw}")))?,
        None => default_port,
    };
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Request;

    fn parts_for(uri: &str, host: Option<&str>) -> Parts {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(h) = host {
            builder = builder.header(HOST, h);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn test_absolute_form_target() {
        let parts = parts_for("http://example.com:8080/a/b?q=1", None);
        let opts = RequestOptions::from_parts(&parts, false).unwrap();
        assert_eq!(opts.host, "example.com");
        assert_eq!(opts.port, 8080);
        assert_eq!(opts.path, "/a/b?q=1");
        assert_eq!(opts.href(), "http://example.com:8080/a/b?q=1");
        assert_eq!(opts.pool, PoolKind::Plain);
    }

    #[test]
    fn test_origin_form_uses_host_header() {
        let parts = parts_for("/index.html", Some("example.com"));
        let opts = RequestOptions::from_parts(&parts, true).unwrap();
        assert_eq!(opts.host, "example.com");
        assert_eq!(opts.port, 443);
        assert_eq!(opts.scheme, "https");
        assert_eq!(opts.href(), "https://example.com/index.html");
        assert_eq!(opts.pool, PoolKind::Tls);
    }

    #[test]
    fn test_origin_form_without_host_rejected() {
        let parts = parts_for("/index.html", None);
        assert!(RequestOptions::from_parts(&parts, false).is_err());
    }

    #[test]
    fn test_default_port_omitted_from_href() {
        let parts = parts_for("http://example.com/", None);
        let opts = RequestOptions::from_parts(&parts, false).unwrap();
        assert_eq!(opts.port, 80);
        assert_eq!(opts.href(), "http://example.com/");
    }

    #[test]
    fn test_ipv6_host_header() {
        let (host, port) = split_host_port("[::1]:8443", 443).unwrap();
        assert_eq!(host, "[::1]");
        assert_eq!(port, 8443);
        let (host, port) = split_host_port("[2001:db8::1]", 443).unwrap();
        assert_eq!(host, "[2001:db8::1]");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_is_local() {
        let parts = parts_for("/", Some("localhost:3000"));
        let opts = RequestOptions::from_parts(&parts, false).unwrap();
        assert!(opts.is_local());

        let parts = parts_for("/", Some("127.0.0.1"));
        let opts = RequestOptions::from_parts(&parts, false).unwrap();
        assert!(opts.is_local());

        let parts = parts_for("/", Some("example.com"));
        let opts = RequestOptions::from_parts(&parts, false).unwrap();
        assert!(!opts.is_local());
    }
}
