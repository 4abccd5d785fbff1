/// 转发模块
///
/// 无状态转发器是路由核心：请求按域分派，响应沿 Via 栈回送。
/// 所有路由状态都在消息本身的 Via 栈里，不保留事务对象
mod external;
mod stateless;
mod unregistered;

use rsip::{Request, Response};

use crate::error::ProxyResult;

pub use external::ExternalDomainForwarder;
pub use stateless::{StatelessForwarder, StatelessForwarderParts};
pub use unregistered::{ForwardOutcome, UnregisteredUriForwarder};

/// 请求转发器
pub trait RequestForwarder: Send + Sync {
    /// 转发请求；请求中已包含代理自己的 Via
    fn forward_sip_request(&self, request: Request) -> ProxyResult<()>;
}

/// 同时转发请求与响应
pub trait RequestAndResponseForwarder: RequestForwarder {
    /// 去掉栈顶 Via 后按新的栈顶 Via 回送响应，失败不重试
    fn forward_sip_response(&self, response: &Response) -> ProxyResult<()>;
}
