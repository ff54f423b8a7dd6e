//! Declarative route matching.
//!
//! A route carries three independent predicate groups -- domain patterns,
//! an HTTP method allow-list, and path patterns -- plus one bound handler.
//! Groups are conjunctive internally and an empty group is a wildcard:
//! a route matches iff every non-empty group accepts the request.

use crate::error::ProxyError;
use crate::proxy::body::ProxyBody;
use crate::proxy::options::RequestOptions;
use bytes::Bytes;
use hyper::http::request::Parts;
use hyper::{Method, Response};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// What a route handler does with the running request body.
/// An explicit tagged result -- no runtime capability probing.
pub enum Interception {
    /// The body passes through untouched.
    PassThrough,
    /// The running body stream is connected into this sink.
    BodySink(mpsc::Sender<Bytes>),
}

/// Handle through which an intercepting handler writes the response.
/// The first caller wins; later calls are no-ops.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<Mutex<Option<oneshot::Sender<Response<ProxyBody>>>>>,
}

impl Responder {
    pub fn channel() -> (Self, oneshot::Receiver<Response<ProxyBody>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Send the response. Returns false if a response was already sent
    /// or the client went away.
    pub fn respond(&self, response: Response<ProxyBody>) -> bool {
        match self.inner.lock().take() {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

/// An intercepting request handler bound to a route.
///
/// Handlers may mutate the request options, may claim the request body by
/// returning a sink, and are responsible for ending the exchange through
/// the [`Responder`] (keeping a clone to respond after the body drains).
pub trait RouteHandler: Send + Sync {
    fn handle(
        &self,
        head: &Parts,
        options: &mut RequestOptions,
        responder: Responder,
    ) -> Interception;
}

impl<F> RouteHandler for F
where
    F: Fn(&Parts, &mut RequestOptions, Responder) -> Interception + Send + Sync,
{
    fn handle(
        &self,
        head: &Parts,
        options: &mut RequestOptions,
        responder: Responder,
    ) -> Interception {
        self(head, options, responder)
    }
}

/// Compile a domain glob into an anchored, case-insensitive pattern.
/// Non-`*` metacharacters are escaped; `*` becomes a wildcard capture.
pub fn compile_domain(pattern: &str) -> Result<Regex, ProxyError> {
    let escaped = regex::escape(pattern).replace(r"\*", "(.*)");
    Ok(Regex::new(&format!("(?i)^{escaped}"))?)
}

/// Compile a path template with named segments (`/users/:id`) into an
/// anchored pattern. Named segments match one path segment.
pub fn compile_path(pattern: &str) -> Result<Regex, ProxyError> {
    let mut compiled = String::from("^");
    for segment in pattern.trim_start_matches('/').split('/') {
        compiled.push('/');
        if segment.starts_with(':') {
            compiled.push_str("([^/]+)");
        } else {
            compiled.push_str(&regex::escape(segment));
        }
    }
    compiled.push_str("/?$");
    Ok(Regex::new(&compiled)?)
}

/// A domain/method/path predicate bound to a handler. Immutable after
/// registration, held for the lifetime of the proxy instance.
pub struct Route {
    domains: Vec<Regex>,
    methods: Vec<String>,
    paths: Vec<Regex>,
    handler: Option<Arc<dyn RouteHandler>>,
}

impl Default for Route {
    fn default() -> Self {
        Self::new()
    }
}

impl Route {
    pub fn new() -> Self {
        Self {
            domains: Vec::new(),
            methods: Vec::new(),
            paths: Vec::new(),
            handler: None,
        }
    }

    /// Add a domain glob rule.
    pub fn domain(mut self, pattern: &str) -> Result<Self, ProxyError> {
        self.domains.push(compile_domain(pattern)?);
        Ok(self)
    }

    /// Add a raw domain pattern.
    pub fn domain_pattern(mut self, pattern: Regex) -> Self {
        self.domains.push(pattern);
        self
    }

    /// Add a method to the allow-list.
    pub fn method(mut self, method: &str) -> Self {
        self.methods.push(method.to_ascii_uppercase());
        self
    }

    /// Add a path template rule.
    pub fn path(mut self, pattern: &str) -> Result<Self, ProxyError> {
        self.paths.push(compile_path(pattern)?);
        Ok(self)
    }

    /// Add a raw path pattern.
    pub fn path_pattern(mut self, pattern: Regex) -> Self {
        self.paths.push(pattern);
        self
    }

    /// Bind the intercepting handler.
    pub fn handler(mut self, handler: impl RouteHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub(crate) fn bound_handler(&self) -> Option<&Arc<dyn RouteHandler>> {
        self.handler.as_ref()
    }

    /// Whether this route matches a request. `host` is the raw Host
    /// header value (possibly including a port), `path` the URI path.
    pub fn matches(&self, host: &str, method: &Method, path: &str) -> bool {
        let domain = self.domains.is_empty() || self.domains.iter().all(|p| p.is_match(host));
        let allowed = self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method.as_str()));
        let path_ok = self.paths.is_empty() || self.paths.iter().all(|p| p.is_match(path));
        domain && allowed && path_ok
    }
}
