use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use sip_proxy::config::{StaticRoute, DEFAULT_USER_AGENT};
use sip_proxy::{utils, ProxyConfig, SipProxy};
use tracing::{error, info};

/// Stateless SIP proxy and registrar
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP listen address
    #[arg(short, long, env = "SIP_PROXY_LISTEN", default_value = "0.0.0.0:5060")]
    listen: SocketAddr,

    /// Administered domain (repeatable, e.g. example.org)
    #[arg(short, long = "domain", env = "SIP_PROXY_DOMAINS", value_delimiter = ',', required = true)]
    domains: Vec<String>,

    /// Outbound connect timeout in milliseconds
    #[arg(long, env = "SIP_PROXY_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    connect_timeout_ms: u64,

    /// Startup timeout in milliseconds
    #[arg(long, env = "SIP_PROXY_STARTUP_TIMEOUT_MS", default_value_t = 5_000)]
    startup_timeout_ms: u64,

    /// Host advertised in the proxy's Via header
    #[arg(long, env = "SIP_PROXY_VIA_HOST")]
    via_host: Option<String>,

    /// User-Agent header value
    #[arg(long, env = "SIP_PROXY_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Static route "<aor-or-domain>=<addr>[,<addr>...]" (repeatable)
    #[arg(short, long = "route", env = "SIP_PROXY_ROUTES", value_delimiter = ';')]
    routes: Vec<StaticRoute>,

    /// Peer proxy host resolved through DNS (host[:port])
    #[arg(long, env = "SIP_PROXY_DNS_PEER")]
    dns_peer: Option<String>,

    /// Log level
    #[arg(long, env = "SIP_PROXY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> ProxyConfig {
        let mut config = ProxyConfig::new(self.listen)
            .with_domains(&self.domains)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_startup_timeout(Duration::from_millis(self.startup_timeout_ms))
            .with_user_agent(self.user_agent.clone());
        if let Some(host) = &self.via_host {
            config = config.with_via_host(host.clone());
        }
        if let Some(peer) = &self.dns_peer {
            config = config.with_dns_peer(peer.clone());
        }
        self.routes
            .iter()
            .cloned()
            .fold(config, |cfg, route| cfg.with_static_route(route))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    utils::initialize_logging(args.log_level.as_str());

    let config = args.to_config();
    let startup_timeout = config.startup_timeout;

    let proxy = match SipProxy::new(config) {
        Ok(proxy) => proxy,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            error!("Error code: {}", e.error_code());
            return Err(e.into());
        }
    };

    let handle = match proxy.start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start proxy: {}", e);
            error!("Error code: {}", e.error_code());
            return Err(e.into());
        }
    };
    proxy.wait_until_running(startup_timeout).await?;
    info!("SIP proxy running on {}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号, 正在关闭");

    handle.shutdown().await;
    proxy.wait_idle().await;
    info!("SIP proxy stopped");
    Ok(())
}
