//! Request dispatch.
//!
//! Every non-CONNECT request lands here, from the plaintext listener and
//! from terminated tunnels alike. Matched routes take priority over the
//! instance modes; otherwise record, then replay, then plain forwarding.

use super::body::{self, BodyError, ProxyBody};
use super::forward;
use super::options::RequestOptions;
use super::record;
use super::replay;
use super::server::Proxy;
use crate::events::{Event, EventKind};
use crate::passes::OutboundCx;
use crate::route::Interception;
use crate::route::Responder;
use futures::StreamExt;
use http_body_util::{BodyExt, BodyStream};
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

pub async fn handle_request(
    proxy: Arc<Proxy>,
    req: Request<Incoming>,
    peer: Option<SocketAddr>,
    encrypted: bool,
) -> Response<ProxyBody> {
    let (parts, incoming) = req.into_parts();

    let mut options = match RequestOptions::from_parts(&parts, encrypted) {
        Ok(options) => options,
        Err(e) => return forward::error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let mut cx = OutboundCx {
        peer,
        version: parts.version,
        options: &mut options,
    };
    for pass in &proxy.passes.outbound {
        pass.mutate(&mut cx, &proxy.flags);
    }

    proxy.notifier.publish(&Event {
        kind: EventKind::Request,
        detail: format!("{} {}", options.method, options.href()),
    });

    // Routes match on the Host header as sent, port included.
    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| options.host.clone());
    let path = parts.uri.path().to_string();

    let matched: Vec<_> = proxy
        .routes
        .iter()
        .filter(|r| r.matches(&host, &parts.method, &path))
        .filter_map(|r| r.bound_handler())
        .cloned()
        .collect();

    if !matched.is_empty() {
        return intercept(&proxy, matched, parts, options, incoming).await;
    }

    let body = incoming.map_err(|e| Box::new(e) as BodyError).boxed();

    if proxy.flags.ignore_local && options.is_local() {
        return forward::forward(&proxy, &options, peer, body).await;
    }
    if proxy.flags.record {
        return record::record(&proxy, options, peer, body).await;
    }
    if proxy.flags.replay {
        return replay::replay(&proxy, options, peer, body).await;
    }
    forward::forward(&proxy, &options, peer, body).await
}

/// Runs every matched handler, tees the request body into the sinks they
/// claimed, and waits for the first response. If every responder handle
/// is dropped without a response, the exchange ends with an empty 200.
async fn intercept(
    proxy: &Arc<Proxy>,
    handlers: Vec<Arc<dyn crate::route::RouteHandler>>,
    parts: hyper::http::request::Parts,
    mut options: RequestOptions,
    incoming: Incoming,
) -> Response<ProxyBody> {
    let (responder, response_rx) = Responder::channel();

    let mut sinks = Vec::new();
    for handler in &handlers {
        match handler.handle(&parts, &mut options, responder.clone()) {
            Interception::PassThrough => {}
            Interception::BodySink(sink) => sinks.push(sink),
        }
    }

    let href = options.href();
    tokio::spawn(async move {
        let mut stream = BodyStream::new(incoming);
        while let Some(frame) = stream.next().await {
            let Ok(frame) = frame else {
                break;
            };
            if let Some(data) = frame.data_ref() {
                // A closed sink only silences that handler; the rest
                // keep receiving in registration order.
                for sink in &sinks {
                    let _ = sink.send(data.clone()).await;
                }
            }
        }
    });

    // Handlers hold their own responder clones; release ours so the
    // receiver resolves once they are all gone.
    drop(responder);

    match response_rx.await {
        Ok(response) => {
            proxy.notifier.publish(&Event {
                kind: EventKind::Response,
                detail: format!("{} {href} (intercepted)", response.status().as_u16()),
            });
            response
        }
        Err(_) => {
            debug!(href = %href, "no handler responded, completing with empty 200");
            Response::new(body::empty())
        }
    }
}
