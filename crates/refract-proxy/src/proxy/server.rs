//! Proxy instance lifecycle: construction, listeners, shutdown.
//!
//! One instance owns two listeners. The public plaintext listener takes
//! proxy traffic (absolute-form requests and CONNECT). The private
//! interception listener exists only under MITM, bound to an ephemeral
//! loopback port at construction; redirected tunnels land there, get
//! their TLS terminated, and re-enter dispatch marked encrypted.

use super::client::OutboundPools;
use super::forward::error_response;
use super::handler;
use super::tls::acceptor_from_pem;
use super::tunnel::{self, tunnel_target};
use crate::config::{Flags, ProxyConfig};
use crate::error::ProxyError;
use crate::events::{Event, EventKind, Notifier};
use crate::fixture::FixtureStore;
use crate::passes::PassSet;
use crate::route::Route;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::convert::Infallible;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Proxy {
    pub config: ProxyConfig,
    pub flags: Flags,
    pub routes: Vec<Route>,
    pub pools: OutboundPools,
    pub store: Option<FixtureStore>,
    pub notifier: Arc<Notifier>,
    pub passes: PassSet,
    tls: Option<TlsAcceptor>,
    mitm_addr: SocketAddr,
    mitm_listener: Mutex<Option<TcpListener>>,
    shutdown: CancellationToken,
}

/// Binds with address reuse so a restart does not trip over sockets in
/// TIME_WAIT, and with SO_REUSEPORT so multiple instances can share a
/// port on platforms that balance across them.
fn create_reusable_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        use std::os::fd::AsRawFd;
        unsafe {
            let optval: libc::c_int = 1;
            let ret = libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of_val(&optval) as libc::socklen_t,
            );
            if ret != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

impl Proxy {
    /// Builds an instance from configuration and its route table. Under
    /// MITM this also binds the private interception listener, whose
    /// address tunnels are redirected to; it is released with the
    /// instance.
    pub async fn new(config: ProxyConfig, routes: Vec<Route>) -> Result<Self, ProxyError> {
        // Pin the process crypto provider; a no-op if one is already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let flags = config.flags();

        let store = if flags.record || flags.replay {
            Some(FixtureStore::new(&config.fixtures_path)?)
        } else {
            None
        };

        let tls = if flags.mitm {
            let ssl = config.ssl.as_ref().ok_or_else(|| {
                ProxyError::Tls("interception requires key and certificate material".to_string())
            })?;
            Some(acceptor_from_pem(ssl)?)
        } else {
            None
        };

        let loopback = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let (mitm_listener, mitm_addr) = if flags.mitm {
            let listener = TcpListener::bind(loopback).await.map_err(ProxyError::Bind)?;
            let addr = listener.local_addr().map_err(ProxyError::Bind)?;
            (Some(listener), addr)
        } else {
            (None, loopback)
        };

        Ok(Self {
            pools: OutboundPools::new(&config),
            config,
            flags,
            routes,
            store,
            notifier: Arc::new(Notifier::new()),
            passes: PassSet::default(),
            tls,
            mitm_addr,
            mitm_listener: Mutex::new(mitm_listener),
            shutdown: CancellationToken::new(),
        })
    }

    /// Where redirected tunnels terminate. Only meaningful under MITM.
    pub fn mitm_addr(&self) -> SocketAddr {
        self.mitm_addr
    }

    /// Binds the public listener and starts accepting. Returns the bound
    /// address, which differs from the configured one when port 0 was
    /// requested.
    pub async fn listen(self: Arc<Self>) -> Result<SocketAddr, ProxyError> {
        let ip: IpAddr = self.config.host.parse().map_err(|e| {
            ProxyError::Bind(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid listen host {:?}: {e}", self.config.host),
            ))
        })?;
        let listener = create_reusable_listener(SocketAddr::new(ip, self.config.port))
            .map_err(ProxyError::Bind)?;
        let local = listener.local_addr().map_err(ProxyError::Bind)?;

        info!(addr = %local, mitm = self.flags.mitm, record = self.flags.record, replay = self.flags.replay, "proxy listening");
        self.notifier
            .publish(&Event::new(EventKind::Listening, local.to_string()));

        let proxy = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = proxy.shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            let proxy = Arc::clone(&proxy);
                            tokio::spawn(serve_plain(proxy, stream, remote));
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    },
                }
            }
            // Dropping the listener here releases the address.
        });

        if let Some(mitm_listener) = self.mitm_listener.lock().take() {
            let proxy = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = proxy.shutdown.cancelled() => break,
                        accepted = mitm_listener.accept() => match accepted {
                            Ok((stream, remote)) => {
                                let proxy = Arc::clone(&proxy);
                                tokio::spawn(serve_terminated(proxy, stream, remote));
                            }
                            Err(e) => warn!(error = %e, "interception accept failed"),
                        },
                    }
                }
            });
        }

        Ok(local)
    }

    /// Stops both accept loops. In-flight exchanges run to completion on
    /// their own tasks.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.notifier
            .publish(&Event::new(EventKind::Close, "proxy closed"));
    }
}

/// Serves one plaintext proxy connection. CONNECT requests become
/// tunnels via the upgrade mechanism; everything else is dispatched.
async fn serve_plain(proxy: Arc<Proxy>, stream: TcpStream, remote: SocketAddr) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let proxy = Arc::clone(&proxy);
        async move {
            if req.method() == Method::CONNECT {
                let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
                    return Ok::<_, Infallible>(error_response(
                        StatusCode::BAD_REQUEST,
                        "CONNECT requires an authority",
                    ));
                };
                let target = tunnel_target(proxy.flags.mitm, &authority, proxy.mitm_addr);
                Ok(tunnel::handle_connect(req, target, Arc::clone(&proxy.notifier)).await)
            } else {
                Ok(handler::handle_request(proxy, req, Some(remote), false).await)
            }
        }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        debug!(remote = %remote, error = %e, "connection ended with error");
    }
}

/// Serves one redirected tunnel: terminate TLS, then dispatch the inner
/// requests marked encrypted.
async fn serve_terminated(proxy: Arc<Proxy>, stream: TcpStream, remote: SocketAddr) {
    let Some(acceptor) = proxy.tls.clone() else {
        return;
    };
    match acceptor.accept(stream).await {
        Ok(tls_stream) => {
            let io = TokioIo::new(tls_stream);
            let service = service_fn(move |req| {
                let proxy = Arc::clone(&proxy);
                async move {
                    Ok::<_, Infallible>(handler::handle_request(proxy, req, Some(remote), true).await)
                }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(remote = %remote, error = %e, "terminated connection ended with error");
            }
        }
        Err(e) => warn!(remote = %remote, error = %e, "tls termination failed"),
    }
}
