//! Record mode: forward while persisting the exchange as a fixture.
//!
//! Both bodies are tapped as they stream, so the client sees exactly the
//! bytes the origin sent with no extra buffering delay. Persistence runs
//! on a detached task once both taps complete; a stream that aborts
//! mid-flight drops its tap sender and nothing is written.

use super::forward::error_response;
use super::options::RequestOptions;
use super::server::Proxy;
use crate::events::{Event, EventKind};
use crate::fingerprint;
use crate::fixture::{headers_to_json, FixtureMeta, FixtureRequest, FixtureResponse};
use crate::passes::InboundCx;
use crate::proxy::body::ProxyBody;
use crate::tap::tapped;
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn record(
    proxy: &Arc<Proxy>,
    options: RequestOptions,
    peer: Option<SocketAddr>,
    body: ProxyBody,
) -> Response<ProxyBody> {
    let uri = match options.uri() {
        Ok(uri) => uri,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let (outbound_body, request_tap) = tapped(body);
    let mut req = match Request::builder()
        .method(options.method.clone())
        .uri(uri)
        .body(outbound_body)
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

    let remote = match proxy.pools.request(options.pool, req).await {
        Ok(remote) => remote,
        Err(e) => {
            warn!(href = %options.href(), error = %e, "record forward failed");
            proxy.notifier.publish(&Event {
                kind: EventKind::Error,
                detail: format!("forward to {} failed: {e}", options.href()),
            });
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Proxy error: {e}"),
            );
        }
    };

    let (parts, remote_body) = remote.into_parts();
    let (relayed_body, response_tap) = tapped(remote_body);

    let mut response = Response::new(relayed_body);
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

    // Persist off the response path. The fixture captures the remote
    // headers as sent, not the pass-mutated set delivered to the client.
    let proxy = Arc::clone(proxy);
    tokio::spawn(async move {
        let (request_summary, response_summary) = match tokio::join!(request_tap, response_tap) {
            (Ok(req), Ok(resp)) => (req, resp),
            _ => {
                debug!(href = %options.href(), "exchange aborted before completion, not recorded");
                return;
            }
        };
        let Some(store) = proxy.store.as_ref() else {
            return;
        };

        let href = options.href();
        let id = fingerprint::fixture_id(
            &options.method,
            &href,
            &options.headers,
            &request_summary.digest,
            &request_summary.trailers,
        );
        let meta = FixtureMeta {
            id: id.clone(),
            request: FixtureRequest {
                method: options.method.as_str().to_string(),
                href: href.clone(),
                headers: headers_to_json(&options.headers),
                trailers: headers_to_json(&request_summary.trailers),
                body: request_summary.digest,
            },
            response: FixtureResponse {
                status_code: parts.status.as_u16(),
                status_message: parts
                    .status
                    .canonical_reason()
                    .unwrap_or_default()
                    .to_string(),
                href,
                headers: headers_to_json(&parts.headers),
                trailers: headers_to_json(&response_summary.trailers),
                body: response_summary.digest.clone(),
            },
        };

        // Meta and body are written independently. A failed meta write
        // must not strand the blob a later exchange may deduplicate onto.
        match store.write_meta(&meta).await {
            Ok(true) => debug!(id = %id, "fixture recorded"),
            Ok(false) => debug!(id = %id, "fixture already present"),
            Err(e) => warn!(id = %id, error = %e, "fixture meta write failed"),
        }
        if let Err(e) = store
            .write_body(&response_summary.digest, &response_summary.body)
            .await
        {
            warn!(digest = %response_summary.digest, error = %e, "fixture body write failed");
        }
    });

    response
}
