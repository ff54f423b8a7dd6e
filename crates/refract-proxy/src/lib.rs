//! Refract: an intercepting HTTP/HTTPS proxy for deterministic testing.
//!
//! Refract accepts client traffic on a plaintext listener, optionally
//! terminates TLS itself (MITM) to inspect encrypted exchanges, lets
//! declarative routes intercept matching requests, and can record live
//! request/response pairs to -- or replay them from -- a content-addressed
//! fixture store.

pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod fixture;
pub mod passes;
pub mod proxy;
pub mod route;
pub mod tap;

pub use config::{Flags, ProxyConfig, SslConfig};
pub use error::ProxyError;
pub use events::{Event, EventKind, Notifier};
pub use fixture::{FixtureMeta, FixtureStore};
pub use proxy::Proxy;
pub use route::{Interception, Responder, Route, RouteHandler};
