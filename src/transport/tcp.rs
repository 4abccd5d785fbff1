/// TCP 传输实现
///
/// 每个连接一个写任务，通过无界通道排队发送；读方向以消息流形式交给会话驱动
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use futures_util::SinkExt;
use rsip::SipMessage;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Connected, Connection, ConnectionId, Connector, SipFrameCodec};
use crate::error::{ProxyError, ProxyResult};

/// TCP 连接句柄
#[derive(Debug)]
pub struct TcpConnection {
    id: ConnectionId,
    remote: SocketAddr,
    outbound: mpsc::UnboundedSender<SipMessage>,
    closed: CancellationToken,
}

impl TcpConnection {
    /// 接管一个已建立的 TcpStream
    ///
    /// 返回连接句柄和入站消息流。无法解析的帧记录日志后跳过，
    /// 分帧错误或对端关闭时流结束
    pub fn attach(
        stream: TcpStream,
    ) -> ProxyResult<(Arc<TcpConnection>, BoxStream<'static, SipMessage>)> {
        let remote = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("设置 TCP_NODELAY 失败 {}: {}", remote, e);
        }

        let (read_half, write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<SipMessage>();
        let closed = CancellationToken::new();
        let id = ConnectionId::next();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            let mut writer = FramedWrite::new(write_half, SipFrameCodec::new());
            loop {
                tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(message) => {
                            if let Err(e) = writer.send(message).await {
                                warn!("{} 写入 {} 失败: {}", id, remote, e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            writer_closed.cancel();
            debug!("{} 写任务结束", id);
        });

        let inbound = FramedRead::new(read_half, SipFrameCodec::new())
            .take_until(closed.clone().cancelled_owned())
            .take_while(move |frame| {
                if let Err(e) = frame {
                    warn!("{} 分帧错误, 关闭连接 {}: {}", id, remote, e);
                }
                future::ready(frame.is_ok())
            })
            .filter_map(move |frame| {
                future::ready(frame.ok().and_then(|bytes| parse_frame(&bytes, remote)))
            })
            .boxed();

        let connection = Arc::new(TcpConnection {
            id,
            remote,
            outbound: tx,
            closed,
        });
        Ok((connection, inbound))
    }
}

fn parse_frame(bytes: &Bytes, remote: SocketAddr) -> Option<SipMessage> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("来自 {} 的消息不是合法 UTF-8, 丢弃: {}", remote, e);
            return None;
        }
    };
    match SipMessage::try_from(text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("无法解析来自 {} 的 SIP 消息, 丢弃: {}", remote, e);
            None
        }
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.outbound.is_closed()
    }

    fn send(&self, message: SipMessage) -> ProxyResult<()> {
        if !self.is_open() {
            return Err(ProxyError::ConnectionClosed(self.id));
        }
        self.outbound
            .send(message)
            .map_err(|_| ProxyError::ConnectionClosed(self.id))
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// TCP 出站连接器
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: SocketAddr) -> ProxyResult<Connected> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ProxyError::connect_failure(addr, e))?;
        let (connection, inbound) = TcpConnection::attach(stream)?;
        debug!("已建立到 {} 的出站连接 {}", addr, connection.id());
        Ok(Connected {
            connection,
            inbound,
        })
    }
}
