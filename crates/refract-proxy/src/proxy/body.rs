//! Body type aliases and constructors shared across the proxy.

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// The uniform body type flowing through every proxy surface.
pub type ProxyBody = BoxBody<Bytes, BodyError>;

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

pub fn full<T: Into<Bytes>>(data: T) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_full_round_trip() {
        let body = full("hello");
        let collected = body.collect().await.unwrap();
        assert_eq!(collected.to_bytes(), Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_empty_is_empty() {
        let body = empty();
        let collected = body.collect().await.unwrap();
        assert!(collected.to_bytes().is_empty());
    }
}
