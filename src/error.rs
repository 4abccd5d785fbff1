use std::net::SocketAddr;

use thiserror::Error;

use crate::transport::ConnectionId;

/// SIP代理操作的Result类型别名
pub type ProxyResult<T> = Result<T, ProxyError>;

/// SIP代理相关错误类型
#[derive(Error, Debug)]
pub enum ProxyError {
    /// 消息格式错误（缺少 From / Via 等），丢弃且不回复
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// 响应中的 Via 不足以路由
    #[error("Not enough Via headers in response: found {found}")]
    InsufficientRouting { found: usize },

    /// 出站连接相关错误
    #[error("Could not connect to {target}: {reason}")]
    ConnectFailure { target: SocketAddr, reason: String },

    #[error("Timed out after {timeout_ms}ms connecting to {target}")]
    ConnectTimeout { target: SocketAddr, timeout_ms: u64 },

    /// 位置服务无法给出目标
    #[error("Could not resolve targets: {0}")]
    ResolutionFailure(String),

    #[error("No connection for {0}")]
    NoConnection(SocketAddr),

    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// 启动相关错误
    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Proxy did not reach running state within {0}ms")]
    StartupTimeout(u64),

    /// SIP解析错误
    #[error("SIP parse error: {0}")]
    Sip(#[from] rsip::Error),

    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ProxyError {
    /// 判断错误是否可恢复（未注册 URI 转发据此决定是否继续尝试下一个候选地址）
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProxyError::ConnectFailure { .. } => true,
            ProxyError::ConnectTimeout { .. } => true,
            ProxyError::NoConnection(_) => true,
            ProxyError::ConnectionClosed(_) => true,
            ProxyError::Io(_) => true,
            ProxyError::MalformedMessage(_) => false,
            ProxyError::InsufficientRouting { .. } => false,
            ProxyError::ResolutionFailure(_) => false,
            ProxyError::Bind { .. } => false,
            ProxyError::StartupTimeout(_) => false,
            ProxyError::Sip(_) => false,
            ProxyError::Config(_) => false,
        }
    }

    /// 获取标准错误代码，用于日志分析和监控
    pub fn error_code(&self) -> &'static str {
        match self {
            ProxyError::MalformedMessage(_) => "MALFORMED_MESSAGE",
            ProxyError::InsufficientRouting { .. } => "INSUFFICIENT_ROUTING",
            ProxyError::ConnectFailure { .. } => "CONNECT_FAILURE",
            ProxyError::ConnectTimeout { .. } => "CONNECT_TIMEOUT",
            ProxyError::ResolutionFailure(_) => "RESOLUTION_FAILURE",
            ProxyError::NoConnection(_) => "NO_CONNECTION",
            ProxyError::ConnectionClosed(_) => "CONNECTION_CLOSED",
            ProxyError::Bind { .. } => "BIND_FAILURE",
            ProxyError::StartupTimeout(_) => "STARTUP_TIMEOUT",
            ProxyError::Sip(_) => "SIP_PARSE_ERROR",
            ProxyError::Io(_) => "IO_ERROR",
            ProxyError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// 创建消息格式错误
    pub fn malformed(reason: impl Into<String>) -> Self {
        ProxyError::MalformedMessage(reason.into())
    }

    /// 创建连接失败错误
    pub fn connect_failure(target: SocketAddr, reason: impl ToString) -> Self {
        ProxyError::ConnectFailure {
            target,
            reason: reason.to_string(),
        }
    }

    /// 创建连接超时错误
    pub fn connect_timeout(target: SocketAddr, timeout: std::time::Duration) -> Self {
        ProxyError::ConnectTimeout {
            target,
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    Missing(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<&str> for ConfigError {
    fn from(s: &str) -> Self {
        ConfigError::Parse(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_errors_are_recoverable() {
        let target: SocketAddr = "10.0.0.1:5060".parse().unwrap();
        assert!(ProxyError::connect_failure(target, "refused").is_recoverable());
        assert!(
            ProxyError::connect_timeout(target, std::time::Duration::from_secs(10)).is_recoverable()
        );
        assert!(!ProxyError::InsufficientRouting { found: 1 }.is_recoverable());
        assert!(!ProxyError::malformed("no From").is_recoverable());
    }

    #[test]
    fn test_error_codes() {
        let target: SocketAddr = "10.0.0.1:5060".parse().unwrap();
        assert_eq!(
            ProxyError::connect_timeout(target, std::time::Duration::from_millis(1500))
                .error_code(),
            "CONNECT_TIMEOUT"
        );
        assert_eq!(
            ProxyError::InsufficientRouting { found: 0 }.error_code(),
            "INSUFFICIENT_ROUTING"
        );
        assert_eq!(
            ProxyError::from(ConfigError::Missing("listen".into())).error_code(),
            "CONFIG_ERROR"
        );
    }

    #[test]
    fn test_timeout_message_carries_millis() {
        let target: SocketAddr = "10.0.0.1:5060".parse().unwrap();
        let err = ProxyError::connect_timeout(target, std::time::Duration::from_secs(10));
        assert_eq!(
            err.to_string(),
            "Timed out after 10000ms connecting to 10.0.0.1:5060"
        );
    }
}
