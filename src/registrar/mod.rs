/// 注册服务模块
///
/// 维护 AOR 到活动连接的绑定。代理不对客户端鉴权，
/// 绑定随连接关闭或被新的 REGISTER 覆盖而失效
mod registry;

use std::sync::Arc;

use rsip::Request;

use crate::error::ProxyResult;
use crate::sip_uri::SipUri;
use crate::transport::ConnectionRef;

pub use registry::SipRegistrar;

/// 注册事件监听器
///
/// 回调在消息分发路径上同步执行，按添加顺序调用。
/// 实现必须立即返回，不能阻塞或执行耗时操作
pub trait RegistrationListener: Send + Sync {
    fn on_registered(&self, uri: &SipUri);

    fn on_unregistered(&self, uri: &SipUri);
}

/// 注册器 trait
pub trait Registrar: Send + Sync {
    /// 处理 REGISTER：绑定 From 中的 AOR 到 `connection`，在该连接上回复 200 OK
    ///
    /// From 缺失或无法解析时返回 `MalformedMessage`，不回复
    fn handle_register(&self, register: &Request, connection: &ConnectionRef) -> ProxyResult<()>;

    /// 查找 AOR 当前绑定的活动连接
    fn lookup(&self, uri: &SipUri) -> Option<ConnectionRef>;

    fn has_registration(&self, uri: &SipUri) -> bool;

    /// 连接关闭通知，移除该连接上的所有绑定
    fn session_closed(&self, connection: &ConnectionRef);

    fn add_registration_listener(&self, listener: Arc<dyn RegistrationListener>);
}
