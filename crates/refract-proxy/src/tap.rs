//! Recording taps.
//!
//! A tap is a pass-through body stage: it forwards frames unmodified while
//! computing a running SHA-256 digest and retaining a full in-memory copy
//! of the data, and captures trailer frames. When the stream ends, a
//! [`TapSummary`] is delivered through a oneshot channel. Hashing runs
//! inline on the runtime.

use crate::fingerprint::digest_hex;
use crate::proxy::body::{BodyError, ProxyBody};
use bytes::{Bytes, BytesMut};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyStream, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::HeaderMap;
use sha2::{Digest, Sha256};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// What a tap observed once its stream completed.
#[derive(Debug)]
pub struct TapSummary {
    /// Uppercase-hex SHA-256 of the forwarded bytes
    pub digest: String,
    /// Full copy of the forwarded bytes
    pub body: Bytes,
    /// Trailer headers, if the stream carried any
    pub trailers: HeaderMap,
}

/// Pass-through frame stream that hashes and buffers what flows through it.
pub struct Tap<B> {
    inner: BodyStream<B>,
    hasher: Sha256,
    buf: BytesMut,
    trailers: HeaderMap,
    done: Option<oneshot::Sender<TapSummary>>,
}

impl<B> futures::Stream for Tap<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BodyError>,
{
    type Item = Result<Frame<Bytes>, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.hasher.update(data);
                    this.buf.extend_from_slice(data);
                } else if let Some(trailers) = frame.trailers_ref() {
                    this.trailers = trailers.clone();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e.into()))),
            Poll::Ready(None) => {
                // Deliver the summary exactly once, at natural end of stream.
                // If the connection aborted mid-stream the sender is dropped
                // instead and the receiver observes the cancellation.
                if let Some(done) = this.done.take() {
                    let summary = TapSummary {
                        digest: digest_hex(std::mem::take(&mut this.hasher)),
                        body: std::mem::take(&mut this.buf).freeze(),
                        trailers: std::mem::take(&mut this.trailers),
                    };
                    let _ = done.send(summary);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Wrap a body in a tap. Returns the tapped body (to forward in place of
/// the original) and the receiver for the completion summary.
pub fn tapped<B>(body: B) -> (ProxyBody, oneshot::Receiver<TapSummary>)
where
    B: Body<Data = Bytes> + Send + Sync + Unpin + 'static,
    B::Error: Into<BodyError>,
{
    let (tx, rx) = oneshot::channel();
    let tap = Tap {
        inner: BodyStream::new(body),
        hasher: Sha256::new(),
        buf: BytesMut::new(),
        trailers: HeaderMap::new(),
        done: Some(tx),
    };
    (BoxBody::new(StreamBody::new(tap)), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::body_digest;
    use http_body_util::{BodyExt, Full};
    use hyper::header::HeaderValue;

    #[tokio::test]
    async fn test_tap_forwards_bytes_unmodified() {
        let (body, _rx) = tapped(Full::new(Bytes::from_static(b"hello world")));
        let collected = body.collect().await.unwrap();
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_tap_summary_digest_and_copy() {
        let (body, rx) = tapped(Full::new(Bytes::from_static(b"hello world")));
        let _ = body.collect().await.unwrap();

        let summary = rx.await.unwrap();
        assert_eq!(summary.digest, body_digest(b"hello world"));
        assert_eq!(summary.body, Bytes::from_static(b"hello world"));
        assert!(summary.trailers.is_empty());
    }

    #[tokio::test]
    async fn test_tap_captures_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", HeaderValue::from_static("abc"));

        let frames: Vec<Result<Frame<Bytes>, BodyError>> = vec![
            Ok(Frame::data(Bytes::from_static(b"chunk"))),
            Ok(Frame::trailers(trailers)),
        ];
        let source = StreamBody::new(futures::stream::iter(frames));

        let (body, rx) = tapped(source);
        let collected = body.collect().await.unwrap();
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"chunk"));

        let summary = rx.await.unwrap();
        assert_eq!(summary.digest, body_digest(b"chunk"));
        assert_eq!(summary.trailers.get("x-checksum").unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_dropped_tap_cancels_summary() {
        let (body, rx) = tapped(Full::new(Bytes::from_static(b"never read")));
        drop(body);
        assert!(rx.await.is_err());
    }
}
