// 声明所有模块
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod location;
pub mod message;
pub mod registrar;
pub mod server;
pub mod session;
pub mod sip_uri;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod test_support;

/// 重新导出thiserror错误类型
pub use crate::error::{ConfigError, ProxyError, ProxyResult};

/// 主要API重新导出，简化使用
pub use crate::config::{ProxyConfig, RouteKey, StaticRoute};
pub use crate::forwarder::{RequestAndResponseForwarder, RequestForwarder, StatelessForwarder};
pub use crate::location::{LocationService, LocationServiceChain, TargetSet};
pub use crate::message::{DefaultMessageFactory, MessageFactory, ProxyMessage};
pub use crate::registrar::{Registrar, RegistrationListener, SipRegistrar};
pub use crate::server::{ProxyHandle, ProxyState, SipProxy};
pub use crate::sip_uri::SipUri;
pub use crate::transport::{Connection, ConnectionRef, Connector, Transport};

/// SIP 代理库的版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 便捷函数：按给定监听地址和域启动代理
pub async fn start_proxy(
    listen: std::net::SocketAddr,
    domain: &str,
) -> ProxyResult<(SipProxy, ProxyHandle)> {
    let proxy = SipProxy::new(ProxyConfig::new(listen).with_domain(domain))?;
    let handle = proxy.start().await?;
    Ok((proxy, handle))
}
