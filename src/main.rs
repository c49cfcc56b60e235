//! spoof-router: local DNS redirector with a hostname-peeking TCP proxy
//!
//! This is the main entry point for the router binary.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration (requires privilege for 53/80/443)
//! sudo ./spoof-router
//!
//! # Run with a custom configuration
//! sudo ./spoof-router -c /path/to/config.json
//!
//! # Validate a configuration without starting
//! ./spoof-router -c config.json --check
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spoof_router::config::{apply_env_overrides, load_config, Config};
use spoof_router::dns::{DnsResponder, Upstreams};
use spoof_router::error::RouterError;
use spoof_router::proxy::ProxyServer;
use spoof_router::rules::SuffixMatcher;
use spoof_router::sink::UdpSink;

/// Default configuration file location
const DEFAULT_CONFIG_PATH: &str = "/etc/spoof-router/config.json";

/// Command-line arguments
struct Args {
    /// Configuration file path, when given explicitly
    config_path: Option<PathBuf>,
    /// Print the default configuration and exit
    generate_config: bool,
    /// Validate the configuration and exit
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = None;
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = Some(PathBuf::from(path));
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("spoof-router v{}", spoof_router::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"spoof-router v{}

Local DNS redirector: steers an allow-list of domains through a
substitute egress IP.

USAGE:
    spoof-router [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: {DEFAULT_CONFIG_PATH}]
    -g, --generate-config   Print the default configuration and exit
    --check                 Check the configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    SPOOF_ROUTER_LOG_LEVEL      Override log level (trace, debug, info, warn, error)
    SPOOF_ROUTER_SPOOF_IP       Override the spoof IP
    SPOOF_ROUTER_RESOLVER_DNS   Override the trusted resolver address

REQUIREMENTS:
    - Privilege to bind ports 53, 80 and 443
    - CAP_NET_RAW for ICMP Port-Unreachable emission (optional; the UDP
      sink degrades to silent dropping without it)"#,
        spoof_router::VERSION
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        println!("{}", serde_json::to_string_pretty(&Config::default())?);
        return Ok(());
    }

    let config = match &args.config_path {
        Some(path) => load_config(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load_config(DEFAULT_CONFIG_PATH)?,
        None => Config::default(),
    };
    let config = apply_env_overrides(config)?;

    if args.check_config {
        println!("Configuration OK");
        return Ok(());
    }

    let filter =
        EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== spoof-router v{} ===", spoof_router::VERSION);
    info!("spoof IP: {}", config.spoof_ip);
    info!("spoof suffixes: {:?}", config.spoof_suffixes);
    info!("DNS listen: {}", config.listen.dns_udp);
    info!("HTTP listen: {}", config.listen.http_tcp);
    info!("HTTPS listen: {}", config.listen.https_tcp);
    info!("QUIC sink: {}", config.listen.quic_sink_udp);
    info!("upstream DNS: {:?}", config.upstream_dns);
    info!("resolver DNS: {}", config.resolver_dns);

    let matcher = Arc::new(SuffixMatcher::new(&config.spoof_suffixes));
    let upstreams = Arc::new(Upstreams::new(
        config.upstream_dns.clone(),
        config.timeouts.upstream(),
    ));

    // Bind everything before spawning anything: a failed bind is fatal and
    // must abort startup as a whole.
    let sink = UdpSink::bind(config.listen.quic_sink_udp).await?;
    let responder = DnsResponder::bind(
        config.listen.dns_udp,
        config.spoof_ip,
        Arc::clone(&matcher),
        upstreams,
    )
    .await?;
    let proxy = ProxyServer::bind(&config, matcher).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut services: Vec<(&str, JoinHandle<Result<(), RouterError>>)> = Vec::new();

    let rx = shutdown_tx.subscribe();
    services.push((
        "udp-sink",
        tokio::spawn(async move { sink.run(rx).await.map_err(RouterError::from) }),
    ));

    let rx = shutdown_tx.subscribe();
    services.push((
        "dns-responder",
        tokio::spawn(async move { responder.run(rx).await.map_err(RouterError::from) }),
    ));

    let proxy_tx = shutdown_tx.clone();
    services.push((
        "tcp-proxy",
        tokio::spawn(async move { proxy.run(&proxy_tx).await.map_err(RouterError::from) }),
    ));

    info!("all services started");

    let mut sigterm = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        _ = signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    let _ = shutdown_tx.send(());

    // The proxy enforces the drain deadline itself; the outer timeout is a
    // backstop for a service that fails to exit at all.
    let deadline = config.timeouts.shutdown() + Duration::from_secs(1);
    let mut clean = true;

    let (names, handles): (Vec<_>, Vec<_>) = services.into_iter().unzip();
    match timeout(deadline, futures::future::join_all(handles)).await {
        Ok(results) => {
            for (name, result) in names.iter().zip(results) {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!("{} shutdown error: {}", name, err);
                        clean = false;
                    }
                    Err(err) => {
                        error!("{} task failed: {}", name, err);
                        clean = false;
                    }
                }
            }
        }
        Err(_) => {
            error!("shutdown deadline exceeded, forcing exit");
            clean = false;
        }
    }

    if clean {
        info!("shutdown completed successfully");
        Ok(())
    } else {
        info!("shutdown completed with errors");
        std::process::exit(1);
    }
}
