//! Outbound connection pools.
//!
//! Two pooled clients back all forwarding: one for plaintext origins and
//! one re-encrypting requests that arrived through a terminated tunnel.
//! The TLS pool skips upstream certificate verification, since the whole
//! point of interception is targets that present local certificates.

use super::body::ProxyBody;
use super::options::PoolKind;
use super::tls::NoVerifier;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;

pub struct OutboundPools {
    plain: Client<HttpConnector, ProxyBody>,
    tls: Client<HttpsConnector<HttpConnector>, ProxyBody>,
}

fn base_connector() -> HttpConnector {
    let mut connector = HttpConnector::new();
    connector.set_keepalive(Some(Duration::from_secs(60)));
    connector.set_connect_timeout(Some(Duration::from_secs(30)));
    connector
}

impl OutboundPools {
    pub fn new(config: &ProxyConfig) -> Self {
        let plain = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_sockets)
            .build(base_connector());

        let mut tls_connector = base_connector();
        tls_connector.enforce_http(false);
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(
                rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth(),
            )
            .https_only()
            .enable_http1()
            .wrap_connector(tls_connector);
        let tls = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_sockets)
            .build(https);

        Self { plain, tls }
    }

    pub async fn request(
        &self,
        kind: PoolKind,
        req: Request<ProxyBody>,
    ) -> Result<Response<Incoming>, ProxyError> {
        let result = match kind {
            PoolKind::Plain => self.plain.request(req).await,
            PoolKind::Tls => self.tls.request(req).await,
        };
        result.map_err(|e| ProxyError::Forward(e.to_string()))
    }
}
