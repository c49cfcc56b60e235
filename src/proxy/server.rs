//! TCP proxy server
//!
//! Two listeners (HTTP on 80, HTTPS on 443) receive the connections that
//! the forged DNS answers steer here. Each accepted connection runs a
//! fixed pipeline: peek the real hostname (HTTP `Host` or TLS SNI) under
//! the peek deadline, check it against the allow-list, resolve it through
//! the trusted resolver, dial the real backend, then tunnel. Any failure
//! before the tunnel is established drops the client silently.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{self, timeout};
use tracing::{debug, info, warn};

use super::resolver::TrustedResolver;
use super::tunnel::{run_tunnel, TunnelSummary};
use crate::config::Config;
use crate::error::ProxyError;
use crate::rules::SuffixMatcher;
use crate::sniff::{peek_client_hello, peek_http_host, SniffError};

/// Interval between drain-progress checks during shutdown
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Which listener a connection arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    /// Plain HTTP; hostname from the Host header
    Http,
    /// HTTPS; hostname from the TLS SNI
    Https,
}

impl ProxyProtocol {
    fn label(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
        }
    }
}

/// Backend ports dialed per protocol
#[derive(Debug, Clone, Copy)]
struct BackendPorts {
    http: u16,
    https: u16,
}

impl Default for BackendPorts {
    fn default() -> Self {
        Self {
            http: 80,
            https: 443,
        }
    }
}

impl BackendPorts {
    fn for_protocol(self, proto: ProxyProtocol) -> u16 {
        match proto {
            ProxyProtocol::Http => self.http,
            ProxyProtocol::Https => self.https,
        }
    }
}

/// Shared per-connection context
struct ProxyContext {
    matcher: Arc<SuffixMatcher>,
    resolver: TrustedResolver,
    peek_timeout: Duration,
    dial_timeout: Duration,
    ports: BackendPorts,
    /// Tunnels currently in flight, for shutdown draining
    active: AtomicUsize,
}

/// Decrements the active-tunnel count when a connection task ends
struct ActiveGuard(Arc<ProxyContext>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The dual HTTP/HTTPS proxy service
pub struct ProxyServer {
    http_listener: TcpListener,
    https_listener: TcpListener,
    ctx: Arc<ProxyContext>,
    drain_timeout: Duration,
}

impl ProxyServer {
    /// Bind both proxy listeners
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Bind` if either listener cannot be bound; this
    /// is fatal at startup.
    pub async fn bind(config: &Config, matcher: Arc<SuffixMatcher>) -> Result<Self, ProxyError> {
        let resolver = TrustedResolver::new(config.resolver_dns, config.timeouts.dial());
        Self::bind_inner(
            config.listen.http_tcp,
            config.listen.https_tcp,
            matcher,
            resolver,
            config.timeouts.peek(),
            config.timeouts.dial(),
            config.timeouts.shutdown(),
            BackendPorts::default(),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn bind_inner(
        http_addr: SocketAddr,
        https_addr: SocketAddr,
        matcher: Arc<SuffixMatcher>,
        resolver: TrustedResolver,
        peek_timeout: Duration,
        dial_timeout: Duration,
        drain_timeout: Duration,
        ports: BackendPorts,
    ) -> Result<Self, ProxyError> {
        let http_listener = TcpListener::bind(http_addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: http_addr,
                source,
            })?;
        let https_listener = TcpListener::bind(https_addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: https_addr,
                source,
            })?;

        Ok(Self {
            http_listener,
            https_listener,
            ctx: Arc::new(ProxyContext {
                matcher,
                resolver,
                peek_timeout,
                dial_timeout,
                ports,
                active: AtomicUsize::new(0),
            }),
            drain_timeout,
        })
    }

    /// Local address of the HTTP listener
    pub fn http_local_addr(&self) -> io::Result<SocketAddr> {
        self.http_listener.local_addr()
    }

    /// Local address of the HTTPS listener
    pub fn https_local_addr(&self) -> io::Result<SocketAddr> {
        self.https_listener.local_addr()
    }

    /// Run both accept loops until the shutdown signal fires, then wait
    /// for in-flight tunnels to drain.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::DrainTimeout` when tunnels are still active at
    /// the drain deadline.
    pub async fn run(self, shutdown_tx: &broadcast::Sender<()>) -> Result<(), ProxyError> {
        let http_task = tokio::spawn(accept_loop(
            self.http_listener,
            ProxyProtocol::Http,
            Arc::clone(&self.ctx),
            shutdown_tx.subscribe(),
        ));
        let https_task = tokio::spawn(accept_loop(
            self.https_listener,
            ProxyProtocol::Https,
            Arc::clone(&self.ctx),
            shutdown_tx.subscribe(),
        ));

        let (http_res, https_res) = tokio::join!(http_task, https_task);
        if let Err(err) = http_res {
            warn!("HTTP accept loop task failed: {}", err);
        }
        if let Err(err) = https_res {
            warn!("HTTPS accept loop task failed: {}", err);
        }

        // Both listeners have stopped accepting; let in-flight tunnels
        // finish up to the drain deadline.
        let drain_start = std::time::Instant::now();
        loop {
            let active = self.ctx.active.load(Ordering::Relaxed);
            if active == 0 {
                info!("all tunnels drained");
                return Ok(());
            }
            if drain_start.elapsed() >= self.drain_timeout {
                warn!("drain deadline reached with {} tunnels active", active);
                return Err(ProxyError::DrainTimeout { active });
            }
            debug!("waiting for {} tunnels to drain", active);
            time::sleep(DRAIN_CHECK_INTERVAL).await;
        }
    }
}

/// Accept connections on one listener until shutdown
async fn accept_loop(
    listener: TcpListener,
    proto: ProxyProtocol,
    ctx: Arc<ProxyContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    match listener.local_addr() {
        Ok(addr) => info!("{} proxy listening on {}", proto.label(), addr),
        Err(err) => warn!("{} proxy local_addr: {}", proto.label(), err),
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("{} proxy stopped accepting", proto.label());
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&ctx);
                        ctx.active.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(async move {
                            let _guard = ActiveGuard(Arc::clone(&ctx));
                            handle_connection(ctx, stream, peer, proto).await;
                        });
                    }
                    Err(err) => {
                        debug!("{} accept error: {}", proto.label(), err);
                    }
                }
            }
        }
    }
}

/// Drive one connection through the pipeline; the client socket closes
/// when `stream` drops, whatever the outcome.
async fn handle_connection(
    ctx: Arc<ProxyContext>,
    mut stream: TcpStream,
    peer: SocketAddr,
    proto: ProxyProtocol,
) {
    match tunnel_connection(&ctx, &mut stream, peer, proto).await {
        Ok(summary) => {
            debug!(
                "{} tunnel from {} closed ({} bytes out, {} bytes back)",
                proto.label(),
                peer,
                summary.client_to_backend,
                summary.backend_to_client
            );
        }
        Err(err) => {
            debug!("{} connection from {} dropped: {}", proto.label(), peer, err);
        }
    }
}

async fn tunnel_connection(
    ctx: &ProxyContext,
    client: &mut TcpStream,
    peer: SocketAddr,
    proto: ProxyProtocol,
) -> Result<TunnelSummary, ProxyError> {
    // Peek the hostname under a read deadline; the deadline covers only
    // the peek and is lifted before tunnelling.
    let (host, peeked) = timeout(ctx.peek_timeout, peek_host(proto, client))
        .await
        .map_err(|_| ProxyError::PeekTimeout)??;

    debug!("{} connection from {}, host {}", proto.label(), peer, host);

    if !ctx.matcher.matches(&host) {
        return Err(ProxyError::HostNotAllowed { host });
    }

    let ip = ctx.resolver.resolve(&host).await?;

    let backend_addr = SocketAddr::new(ip, ctx.ports.for_protocol(proto));
    let mut backend = timeout(ctx.dial_timeout, TcpStream::connect(backend_addr))
        .await
        .map_err(|_| ProxyError::DialTimeout { addr: backend_addr })?
        .map_err(|e| ProxyError::Dial {
            addr: backend_addr,
            reason: e.to_string(),
        })?;

    info!(
        "tunnel established: {} <-> {} ({})",
        peer, backend_addr, host
    );

    Ok(run_tunnel(client, &mut backend, peeked).await)
}

async fn peek_host(
    proto: ProxyProtocol,
    client: &mut TcpStream,
) -> Result<(String, Vec<u8>), SniffError> {
    match proto {
        ProxyProtocol::Http => peek_http_host(client).await,
        ProxyProtocol::Https => peek_client_hello(client).await,
    }
}
