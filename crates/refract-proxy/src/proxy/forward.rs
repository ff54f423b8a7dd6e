//! Plain passthrough forwarding.

use super::body::{self, BodyError, ProxyBody};
use super::options::RequestOptions;
use super::server::Proxy;
use crate::events::{Event, EventKind};
use crate::passes::InboundCx;
use http_body_util::BodyExt;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use tracing::warn;

/// Small text/plain error reply, newline terminated.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut resp = Response::new(body::full(format!("{message}\n")));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

/// Issues the outbound request and relays the remote response, running
/// inbound passes over its headers. Upstream failures surface as 500s
/// rather than dropped connections.
pub async fn forward(
    proxy: &Proxy,
    options: &RequestOptions,
    peer: Option<SocketAddr>,
    body: ProxyBody,
) -> Response<ProxyBody> {
    let uri = match options.uri() {
        Ok(uri) => uri,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let mut req = match Request::builder()
        .method(options.method.clone())
        .uri(uri)
        .body(body)
    {
        Ok(req) => req,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Proxy error: {e}"),
            )
        }
    };
    *req.headers_mut() = options.headers.clone();

    match proxy.pools.request(options.pool, req).await {
        Ok(remote) => {
            let (parts, remote_body) = remote.into_parts();
            let mut response =
                Response::new(remote_body.map_err(|e| Box::new(e) as BodyError).boxed());
            *response.status_mut() = parts.status;
            *response.headers_mut() = parts.headers.clone();

            let mut cx = InboundCx {
                peer,
                scheme: options.scheme,
                remote_headers: &parts.headers,
                headers: response.headers_mut(),
            };
            for pass in &proxy.passes.inbound {
                pass.mutate(&mut cx, &proxy.flags);
            }

            proxy.notifier.publish(&Event {
                kind: EventKind::Response,
                detail: format!("{} {}", parts.status.as_u16(), options.href()),
            });
            response
        }
        Err(e) => {
            warn!(href = %options.href(), error = %e, "forward failed");
            proxy.notifier.publish(&Event {
                kind: EventKind::Error,
                detail: format!("forward to {} failed: {e}", options.href()),
            });
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Proxy error: {e}"),
            )
        }
    }
}
