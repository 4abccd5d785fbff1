/// 消息分发器
///
/// 每个连接一个实例，把解码后的 SIP 消息交给注册器或转发器。
/// 单条消息的失败只记录日志，不影响同一连接上的后续消息
use std::sync::Arc;

use rsip::{Request, SipMessage};
use tracing::{debug, info, warn};

use crate::forwarder::RequestAndResponseForwarder;
use crate::message::{via, MessageFactory, ProxyMessage};
use crate::registrar::Registrar;
use crate::session::SessionContext;
use crate::transport::ConnectionRef;

pub struct MessageDispatcher {
    connection: ConnectionRef,
    registrar: Arc<dyn Registrar>,
    forwarder: Arc<dyn RequestAndResponseForwarder>,
    factory: Arc<dyn MessageFactory>,
}

impl MessageDispatcher {
    pub fn new(connection: ConnectionRef, context: &SessionContext) -> Self {
        Self {
            connection,
            registrar: context.registrar.clone(),
            forwarder: context.forwarder.clone(),
            factory: context.factory.clone(),
        }
    }

    /// 分发一条消息
    pub fn dispatch(&self, message: SipMessage) {
        let message = ProxyMessage::from(message);
        debug!("{} 收到 {}", self.connection.id(), message.kind());

        match message {
            ProxyMessage::Register(register) => {
                if let Err(e) = self.registrar.handle_register(&register, &self.connection) {
                    warn!(
                        "丢弃来自 {} 的 REGISTER ({}): {}",
                        self.connection.remote_addr(),
                        e.error_code(),
                        e
                    );
                }
            }
            ProxyMessage::Invite(invite) => self.on_invite(invite),
            ProxyMessage::Ok(response) => {
                if let Err(e) = self.forwarder.forward_sip_response(&response) {
                    warn!(
                        "无法转发 {} 响应 ({}): {}",
                        response.status_code,
                        e.error_code(),
                        e
                    );
                }
            }
            ProxyMessage::RequestTimeout(response) => {
                info!(
                    "收到来自 {} 的 408, 不再路由: {:?}",
                    self.connection.remote_addr(),
                    via::top_via(&response.headers)
                );
            }
            ProxyMessage::Unknown(message) => {
                // 代理只处理 REGISTER / INVITE / 2xx / 408
                info!(
                    "丢弃不支持的消息: {}",
                    message.to_string().lines().next().unwrap_or_default()
                );
            }
        }
    }

    fn on_invite(&self, invite: Request) {
        if via::via_count(&invite.headers) == 0 {
            // 没有 Via 无法回送任何响应，直接丢弃
            warn!("丢弃没有 Via 的 INVITE: {}", invite.uri);
            return;
        }

        let copy = match self
            .factory
            .create_invite_to_forward(self.connection.remote_addr(), &invite)
        {
            Ok(Some(copy)) => copy,
            Ok(None) => {
                info!("INVITE {} 不可转发, 丢弃", invite.uri);
                return;
            }
            Err(e) => {
                warn!("无法生成 INVITE 转发副本 ({}): {}", e.error_code(), e);
                return;
            }
        };

        if let Err(e) = self.forwarder.forward_sip_request(copy) {
            warn!("转发 INVITE {} 失败 ({}): {}", invite.uri, e.error_code(), e);
        }
    }
}
