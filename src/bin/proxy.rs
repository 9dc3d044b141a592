#![forbid(unsafe_code)]

//! HTTP entry point for the YouTube proxy.
//!
//! Every request is answered by the dispatcher in `ytproxy::proxy`; this binary
//! only resolves settings, sets up logging and runs the axum server until
//! Ctrl+C.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ytproxy::config::{ProxySettings, SettingsOverrides, resolve_settings};
use ytproxy::proxy::{ProxyState, router};
use ytproxy::upstream::Upstream;

#[derive(Debug, Parser)]
#[command(name = "ytproxy", about = "CORS-friendly YouTube player data proxy")]
struct ProxyArgs {
    /// Address to listen on (overrides YTPROXY_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides YTPROXY_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Player API endpoint, without the key.
    #[arg(long)]
    innertube_endpoint: Option<String>,
    #[arg(long)]
    innertube_key: Option<String>,
    /// Deadline for each outbound call; unset or 0 waits indefinitely.
    #[arg(long)]
    upstream_timeout_secs: Option<u64>,
    /// Dotenv file consulted after the process environment.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl ProxyArgs {
    fn into_overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            host: self.host,
            port: self.port,
            innertube_endpoint: self.innertube_endpoint,
            innertube_key: self.innertube_key,
            upstream_timeout_secs: self.upstream_timeout_secs,
            env_path: self.env_file,
        }
    }
}

fn listen_addr(settings: &ProxySettings) -> Result<SocketAddr> {
    let host = settings
        .host
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/YTPROXY_HOST")?;
    Ok(SocketAddr::new(host, settings.port))
}

/// Used when `RUST_LOG` is unset or unparsable. Events from this binary carry
/// the `proxy` target, the library's carry `ytproxy`.
const DEFAULT_LOG_FILTER: &str = "ytproxy=info,proxy=info";

fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let settings = resolve_settings(ProxyArgs::parse().into_overrides())?;
    let addr = listen_addr(&settings)?;

    let state = ProxyState::new(Upstream::from_settings(&settings));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        player_endpoint = %settings.innertube_endpoint,
        timeout = ?settings.upstream_timeout,
        "proxy listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running proxy server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}
