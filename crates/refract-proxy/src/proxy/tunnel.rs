//! CONNECT tunneling.
//!
//! A tunnel replies `200` and then splices bytes both ways without
//! interpretation. When interception is on, the tunnel is pointed at the
//! instance's own TLS listener instead of the requested origin, so the
//! encrypted traffic terminates locally and re-enters request handling.

use super::body;
use crate::error::ProxyError;
use crate::events::{Event, EventKind, Notifier};
use crate::proxy::forward::error_response;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Resolves where a CONNECT request actually dials: the redirect
/// listener under interception, otherwise the requested authority with
/// the https default port filled in.
pub fn tunnel_target(mitm: bool, authority: &str, mitm_addr: SocketAddr) -> String {
    if mitm {
        return mitm_addr.to_string();
    }
    let has_port = if let Some(rest) = authority.strip_prefix('[') {
        rest.rfind("]:").is_some()
    } else {
        authority.contains(':')
    };
    if has_port {
        authority.to_string()
    } else {
        format!("{authority}:443")
    }
}

pub async fn handle_connect(
    req: Request<Incoming>,
    target: String,
    notifier: Arc<Notifier>,
) -> Response<body::ProxyBody> {
    match TcpStream::connect(&target).await {
        Ok(mut upstream) => {
            tokio::spawn(async move {
                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => {
                        let mut client = TokioIo::new(upgraded);
                        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                            Ok((up, down)) => {
                                debug!(target = %target, up, down, "tunnel closed");
                            }
                            Err(e) => debug!(target = %target, error = %e, "tunnel aborted"),
                        }
                    }
                    Err(e) => warn!(target = %target, error = %e, "connect upgrade failed"),
                }
            });
            Response::new(body::empty())
        }
        Err(e) => {
            let err = ProxyError::Tunnel(e);
            warn!(target = %target, error = %err, "tunnel connect failed");
            notifier.publish(&Event {
                kind: EventKind::Error,
                detail: format!("{target}: {err}"),
            });
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Connection error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mitm_addr() -> SocketAddr {
        "127.0.0.1:45001".parse().unwrap()
    }

    #[test]
    fn test_target_honors_authority_port() {
        assert_eq!(
            tunnel_target(false, "example.com:8443", mitm_addr()),
            "example.com:8443"
        );
    }

    #[test]
    fn test_target_defaults_to_https_port() {
        assert_eq!(
            tunnel_target(false, "example.com", mitm_addr()),
            "example.com:443"
        );
    }

    #[test]
    fn test_target_ipv6() {
        assert_eq!(
            tunnel_target(false, "[2001:db8::1]", mitm_addr()),
            "[2001:db8::1]:443"
        );
        assert_eq!(
            tunnel_target(false, "[2001:db8::1]:9443", mitm_addr()),
            "[2001:db8::1]:9443"
        );
    }

    #[test]
    fn test_interception_redirects_to_local_listener() {
        assert_eq!(
            tunnel_target(true, "example.com:443", mitm_addr()),
            "127.0.0.1:45001"
        );
    }
}
