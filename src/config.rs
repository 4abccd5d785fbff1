/// 代理配置
///
/// 监听地址、管理的域、超时以及静态路由等
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::sip_uri::{SipUri, DEFAULT_SIP_PORT};
use crate::utils::get_first_non_loopback_interface;

/// 出站连接默认超时
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 等待监听端口就绪的默认超时
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// 默认 User-Agent
pub const DEFAULT_USER_AGENT: &str = concat!("sip-proxy/", env!("CARGO_PKG_VERSION"));

/// 代理配置
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// TCP 监听地址
    pub listen: SocketAddr,

    /// 本代理管理的域（小写）
    pub domains: Vec<String>,

    /// 单次出站连接的最长等待时间
    pub connect_timeout: Duration,

    /// 启动时等待进入 Running 的最长时间
    pub startup_timeout: Duration,

    /// Via 中宣告的主机，未设置时自动探测
    pub via_host: Option<String>,

    pub user_agent: String,

    /// 静态路由
    pub static_routes: Vec<StaticRoute>,

    /// 通过 DNS 解析的对端代理主机名
    pub dns_peer: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            DEFAULT_SIP_PORT,
        ))
    }
}

impl ProxyConfig {
    /// 创建新的代理配置
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            domains: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            via_host: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            static_routes: Vec::new(),
            dns_peer: None,
        }
    }

    /// 添加一个管理的域
    pub fn with_domain(mut self, domain: impl AsRef<str>) -> Self {
        let domain = domain.as_ref().trim().to_ascii_lowercase();
        if !domain.is_empty() && !self.domains.contains(&domain) {
            self.domains.push(domain);
        }
        self
    }

    pub fn with_domains<I, S>(self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        domains.into_iter().fold(self, |cfg, d| cfg.with_domain(d))
    }

    /// 设置出站连接超时
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 设置启动超时
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// 设置 Via 宣告主机
    pub fn with_via_host(mut self, host: impl Into<String>) -> Self {
        self.via_host = Some(host.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// 添加静态路由
    pub fn with_static_route(mut self, route: StaticRoute) -> Self {
        self.static_routes.push(route);
        self
    }

    /// 设置 DNS 对端主机
    pub fn with_dns_peer(mut self, host: impl Into<String>) -> Self {
        self.dns_peer = Some(host.into());
        self
    }

    /// 判断域是否由本代理管理（不区分大小写）
    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
    }

    /// Via 中实际使用的主机
    ///
    /// 优先级：显式配置 > 第一个非回环接口 > 监听地址
    pub fn advertised_host(&self) -> String {
        if let Some(host) = &self.via_host {
            return host.clone();
        }
        if !self.listen.ip().is_unspecified() {
            return self.listen.ip().to_string();
        }
        match get_first_non_loopback_interface() {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                debug!("无法探测本地接口 ({}), 使用 127.0.0.1", e);
                Ipv4Addr::LOCALHOST.to_string()
            }
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domains.is_empty() {
            return Err(ConfigError::Missing("domains".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        if self.startup_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "startup timeout must be greater than zero".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("user agent is empty".to_string()));
        }
        if let Some(peer) = &self.dns_peer {
            if peer.trim().is_empty() {
                return Err(ConfigError::Invalid("dns peer host is empty".to_string()));
            }
        }
        Ok(())
    }
}

/// 静态路由的匹配键
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKey {
    /// 精确匹配某个 AOR
    Aor(SipUri),
    /// 匹配整个域
    Domain(String),
}

/// 静态路由：`<aor-or-domain>=<addr>[,<addr>...]`
///
/// ```rust
/// use sip_proxy::config::{RouteKey, StaticRoute};
///
/// let route: StaticRoute = "example.net=10.0.0.1:5060,10.0.0.2:5060".parse().unwrap();
/// assert_eq!(route.key, RouteKey::Domain("example.net".into()));
/// assert_eq!(route.targets.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRoute {
    pub key: RouteKey,
    pub targets: Vec<SocketAddr>,
}

impl FromStr for StaticRoute {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, targets) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::Parse(format!("static route without '=': {}", s)))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Parse(format!("static route without key: {}", s)));
        }

        let key = if key.contains('@') || key.starts_with("sip:") || key.starts_with("sips:") {
            let uri = if key.starts_with("sip:") || key.starts_with("sips:") {
                key.to_string()
            } else {
                format!("sip:{}", key)
            };
            let aor = uri
                .parse::<SipUri>()
                .map_err(|e| ConfigError::Parse(format!("bad AOR {}: {}", key, e)))?;
            RouteKey::Aor(aor)
        } else {
            RouteKey::Domain(key.to_ascii_lowercase())
        };

        let targets = targets
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<SocketAddr>()
                    .map_err(|e| ConfigError::Parse(format!("bad target {}: {}", t, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if targets.is_empty() {
            return Err(ConfigError::Missing(format!("targets for route {}", s)));
        }

        Ok(StaticRoute { key, targets })
    }
}
