/// 传输层
///
/// 连接抽象、连接表以及 TCP 实现。
/// 代理核心只依赖这里的 trait，测试中使用内存实现替换
pub mod codec;
pub mod layer;
pub mod tcp;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rsip::{Request, Response, SipMessage};

use crate::error::ProxyResult;

pub use codec::SipFrameCodec;
pub use layer::TransportLayer;
pub use tcp::{TcpConnection, TcpConnector};

/// 进程内唯一的连接编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// 双向传输会话
///
/// `send` 只负责入队，不等待写完成
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn remote_addr(&self) -> SocketAddr;

    fn is_open(&self) -> bool;

    fn send(&self, message: SipMessage) -> ProxyResult<()>;

    fn close(&self);
}

pub type ConnectionRef = Arc<dyn Connection>;

/// 传输层需要暴露给代理核心的原语
pub trait Transport: Send + Sync {
    /// 登记一个连接（按对端地址索引）
    fn add_connection(&self, connection: ConnectionRef);

    /// 移除连接
    fn remove_connection(&self, connection: &ConnectionRef);

    /// 是否已存在到任一地址的活动连接
    fn has_connection_for_any(&self, addresses: &[SocketAddr]) -> bool;

    /// 直接在指定连接上写请求
    fn write_request_statelessly(
        &self,
        request: &Request,
        connection: &ConnectionRef,
    ) -> ProxyResult<()>;

    /// 在任一地址对应的已知连接上写请求
    fn write_request(&self, addresses: &[SocketAddr], request: &Request) -> ProxyResult<()>;

    /// 根据栈顶 Via 写响应
    fn write_response(&self, response: &Response) -> ProxyResult<()>;

    /// 向显式地址写响应
    fn write_response_to(&self, address: SocketAddr, response: &Response) -> ProxyResult<()>;
}

/// 出站连接结果：连接句柄以及解码后的入站消息流
pub struct Connected {
    pub connection: ConnectionRef,
    pub inbound: BoxStream<'static, SipMessage>,
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("id", &self.connection.id())
            .field("remote", &self.connection.remote_addr())
            .finish()
    }
}

/// 出站连接器
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: SocketAddr) -> ProxyResult<Connected>;
}
