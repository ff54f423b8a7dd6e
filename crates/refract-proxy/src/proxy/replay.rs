//! Replay mode: answer from recorded fixtures.
//!
//! The request body must be buffered before lookup, since the fixture id
//! depends on its digest. Hits stream the blob from disk; misses either
//! fall through to the network or fail loudly when networking is off.
//!
//! Fixtures persist the recorded reason phrase (`statusMessage`) for
//! inspection, but replayed responses carry only the status code: hyper
//! always emits the canonical reason phrase, so a custom one recorded off
//! the wire is not reproduced.

use super::body::{self, BodyError, ProxyBody};
use super::forward::{self, error_response};
use super::options::RequestOptions;
use super::server::Proxy;
use crate::events::{Event, EventKind};
use crate::fingerprint;
use crate::fixture::headers_from_json;
use crate::passes::ReplayCx;
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::{Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

pub async fn replay(
    proxy: &Arc<Proxy>,
    options: RequestOptions,
    peer: Option<SocketAddr>,
    body: ProxyBody,
) -> Response<ProxyBody> {
    let collected = match body.collect().await {
        Ok(collected) => collected,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("Proxy error: {e}")),
    };
    let trailers = collected.trailers().cloned().unwrap_or_default();
    let bytes = collected.to_bytes();

    let digest = fingerprint::body_digest(&bytes);
    let id = fingerprint::fixture_id(
        &options.method,
        &options.href(),
        &options.headers,
        &digest,
        &trailers,
    );

    let Some(store) = proxy.store.as_ref() else {
        return miss(proxy, &options, peer, bytes, "no fixture store configured").await;
    };

    let meta = match store.read_meta(&id).await {
        Ok(meta) => meta,
        Err(e) => return miss(proxy, &options, peer, bytes, &e.to_string()).await,
    };
    let file = match store.open_body(&meta.response.body).await {
        Ok(file) => file,
        Err(e) => return miss(proxy, &options, peer, bytes, &e.to_string()).await,
    };

    let status = StatusCode::from_u16(meta.response.status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = headers_from_json(&meta.response.headers);
    let replayed_trailers = headers_from_json(&meta.response.trailers);

    let mut cx = ReplayCx {
        meta: &meta,
        headers: &mut headers,
    };
    for pass in &proxy.passes.replay {
        pass.mutate(&mut cx, &proxy.flags);
    }

    debug!(id = %id, href = %options.href(), "replaying fixture");
    proxy.notifier.publish(&Event {
        kind: EventKind::Response,
        detail: format!("{} {} (replayed)", status.as_u16(), options.href()),
    });

    let data = ReaderStream::new(file)
        .map(|chunk| chunk.map(Frame::data).map_err(|e| Box::new(e) as BodyError));
    let tail: Option<Result<Frame<Bytes>, BodyError>> = if replayed_trailers.is_empty() {
        None
    } else {
        Some(Ok(Frame::trailers(replayed_trailers)))
    };
    let stream = data.chain(futures::stream::iter(tail));

    let mut response = Response::new(BoxBody::new(StreamBody::new(stream)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Fixture lookup failed: go to the network when allowed, otherwise
/// report the miss to the client.
async fn miss(
    proxy: &Arc<Proxy>,
    options: &RequestOptions,
    peer: Option<SocketAddr>,
    bytes: Bytes,
    reason: &str,
) -> Response<ProxyBody> {
    if proxy.flags.enable_network {
        debug!(href = %options.href(), reason, "fixture miss, forwarding");
        return forward::forward(proxy, options, peer, body::full(bytes)).await;
    }
    warn!(href = %options.href(), reason, "fixture miss with networking disabled");
    proxy.notifier.publish(&Event {
        kind: EventKind::Error,
        detail: format!("fixture miss for {}: {reason}", options.href()),
    });
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &format!("Proxy error: {reason}"),
    )
}
