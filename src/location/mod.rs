/// 位置服务模块
///
/// 为没有直接注册的 URI 解析出有序的候选地址
mod chain;
mod dns;
mod static_routes;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::sip_uri::SipUri;

pub use chain::LocationServiceChain;
pub use dns::DnsLocationService;
pub use static_routes::StaticLocationService;

/// 有序的候选地址，可能为空
pub type TargetSet = Vec<SocketAddr>;

/// 位置服务 trait
#[async_trait]
pub trait LocationService: Send + Sync {
    /// 是否能为该 URI 给出目标
    fn can_handle(&self, uri: &SipUri) -> bool;

    /// 解析 URI 的候选地址，按尝试顺序排列
    async fn get_target_set(&self, uri: &SipUri) -> TargetSet;
}
