/// SIP URI 工具模块
///
/// 提供地址记录 (AOR) 的规范化表示，以及从 SIP URI 中提取 host / port / domain 的辅助函数
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{ProxyError, ProxyResult};

/// `sip:` 默认端口
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// `sips:` 默认端口
pub const DEFAULT_SIPS_PORT: u16 = 5061;

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UriScheme {
    Sip,
    Sips,
}

impl UriScheme {
    pub fn default_port(self) -> u16 {
        match self {
            UriScheme::Sip => DEFAULT_SIP_PORT,
            UriScheme::Sips => DEFAULT_SIPS_PORT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UriScheme::Sip => "sip",
            UriScheme::Sips => "sips",
        }
    }
}

/// 规范化的 SIP URI，用作注册表的键
///
/// 相等性基于规范形式：scheme、user、小写 host，以及非默认端口。
/// URI 参数与 URI headers 不参与比较。
///
/// # 示例
/// ```rust
/// use sip_proxy::SipUri;
///
/// let a: SipUri = "sip:alice@Example.ORG".parse().unwrap();
/// let b: SipUri = "sip:alice@example.org:5060;transport=tcp".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "sip:alice@example.org");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    scheme: UriScheme,
    user: Option<String>,
    host: String,
    port: Option<u16>,
}

impl SipUri {
    /// 创建新的规范化 URI
    pub fn new(scheme: UriScheme, user: Option<&str>, host: &str, port: Option<u16>) -> Self {
        let host = host
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        Self {
            scheme,
            user: user.filter(|u| !u.is_empty()).map(str::to_string),
            host,
            port: port.filter(|p| *p != scheme.default_port()),
        }
    }

    pub fn scheme(&self) -> UriScheme {
        self.scheme
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// URI 所属的域，即 host 部分
    pub fn domain(&self) -> &str {
        &self.host
    }

    /// 实际端口（未指定时为 scheme 默认端口）
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// 当 host 为 IP 字面量时直接得到套接字地址
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port()))
    }

    /// 解析 host 得到所有候选地址，IP 字面量不经过 DNS
    pub async fn resolve(&self) -> ProxyResult<Vec<SocketAddr>> {
        if let Some(addr) = self.socket_addr() {
            return Ok(vec![addr]);
        }
        let addrs = tokio::net::lookup_host((self.host.as_str(), self.port()))
            .await
            .map_err(|e| ProxyError::ResolutionFailure(format!("{}: {}", self, e)))?;
        Ok(addrs.collect())
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme.as_str())?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

impl TryFrom<&rsip::Uri> for SipUri {
    type Error = ProxyError;

    fn try_from(uri: &rsip::Uri) -> Result<Self, Self::Error> {
        let scheme = match &uri.scheme {
            Some(rsip::Scheme::Sip) => UriScheme::Sip,
            Some(rsip::Scheme::Sips) => UriScheme::Sips,
            None => {
                return Err(ProxyError::malformed(format!("URI without scheme: {}", uri)))
            }
            Some(other) => {
                return Err(ProxyError::malformed(format!(
                    "unsupported URI scheme: {}",
                    other
                )))
            }
        };

        let host = uri.host_with_port.host.to_string();
        if host.trim().is_empty() {
            return Err(ProxyError::malformed(format!("URI without host: {}", uri)));
        }

        let user = uri.auth.as_ref().map(|auth| auth.user.as_str());
        let port = uri.host_with_port.port.as_ref().map(|p| *p.value());

        Ok(SipUri::new(scheme, user, &host, port))
    }
}

impl TryFrom<rsip::Uri> for SipUri {
    type Error = ProxyError;

    fn try_from(uri: rsip::Uri) -> Result<Self, Self::Error> {
        SipUri::try_from(&uri)
    }
}

impl FromStr for SipUri {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri = rsip::Uri::try_from(s.trim())?;
        SipUri::try_from(&uri)
    }
}

/// 获取 SIP URI 字符串中的 host
pub fn host_in_sip_uri(uri: &str) -> ProxyResult<String> {
    Ok(uri.parse::<SipUri>()?.host().to_string())
}

/// 获取 SIP URI 字符串中的端口，未指定时返回 scheme 默认端口
pub fn port_in_sip_uri(uri: &str) -> ProxyResult<u16> {
    Ok(uri.parse::<SipUri>()?.port())
}

/// 获取 SIP URI 字符串所属的域
pub fn domain_in_sip_uri(uri: &str) -> ProxyResult<String> {
    Ok(uri.parse::<SipUri>()?.domain().to_string())
}
