/// SIP 消息模型
///
/// 分发器消费的封闭消息变体集合、Via 栈操作以及消息工厂
pub mod factory;
pub mod via;

use rsip::{Method, Request, Response, SipMessage};

pub use factory::{DefaultMessageFactory, MessageFactory};

/// 代理关心的 SIP 消息种类
#[derive(Debug, Clone)]
pub enum ProxyMessage {
    Invite(Request),
    Register(Request),
    /// 任意 2xx 响应
    Ok(Response),
    /// 408 Request Timeout
    RequestTimeout(Response),
    /// 其他所有消息，代理不转发
    Unknown(SipMessage),
}

impl ProxyMessage {
    /// 用于日志的简短描述
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyMessage::Invite(_) => "INVITE",
            ProxyMessage::Register(_) => "REGISTER",
            ProxyMessage::Ok(_) => "2xx",
            ProxyMessage::RequestTimeout(_) => "408",
            ProxyMessage::Unknown(_) => "unknown",
        }
    }
}

impl From<SipMessage> for ProxyMessage {
    fn from(message: SipMessage) -> Self {
        match message {
            SipMessage::Request(request) => match request.method {
                Method::Invite => ProxyMessage::Invite(request),
                Method::Register => ProxyMessage::Register(request),
                _ => ProxyMessage::Unknown(SipMessage::Request(request)),
            },
            SipMessage::Response(response) => match response.status_code.code() {
                200..=299 => ProxyMessage::Ok(response),
                408 => ProxyMessage::RequestTimeout(response),
                _ => ProxyMessage::Unknown(SipMessage::Response(response)),
            },
        }
    }
}
