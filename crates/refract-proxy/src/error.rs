//! Error types for the proxy.
//!
//! Only listener bind failures are fatal; every other variant is scoped to
//! the request or connection that produced it and must never take the
//! process down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Port in use, permission denied, etc. Fatal at startup.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// Target or MITM listener unreachable during CONNECT.
    #[error("tunnel connect failed: {0}")]
    Tunnel(#[source] std::io::Error),

    /// DNS/connect/timeout/reset while proxying outbound.
    #[error("forwarding failed: {0}")]
    Forward(String),

    /// Missing or corrupt fixture metadata, or a missing body file.
    #[error("fixture lookup failed: {0}")]
    FixtureLookup(String),

    /// Disk full or permission error while persisting a fixture.
    /// Logged only; the live response was already delivered.
    #[error("fixture persistence failed: {0}")]
    FixturePersist(#[source] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
