/// 消息工厂
///
/// 生成转发副本与代理自身发出的响应
use std::net::SocketAddr;

use rsip::prelude::*;
use rsip::{Header, Headers, Request, Response, StatusCode};
use tracing::debug;

use super::via;
use crate::error::{ProxyError, ProxyResult};
use crate::utils::{make_branch, make_tag};

/// RFC 3261 建议的 Max-Forwards 初始值
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

/// 消息工厂 trait
pub trait MessageFactory: Send + Sync {
    /// 生成用于转发的 INVITE 副本
    ///
    /// `remote` 是收到该请求的连接的对端地址。
    /// 返回 `Ok(None)` 表示该请求不应被转发（例如 Max-Forwards 耗尽）
    fn create_invite_to_forward(
        &self,
        remote: SocketAddr,
        invite: &Request,
    ) -> ProxyResult<Option<Request>>;

    /// REGISTER 的 200 OK
    fn create_register_ok(&self, register: &Request) -> Response;

    /// 针对已转发副本的 408 响应，不含代理自己的 Via
    fn create_request_timeout_response(&self, request: &Request) -> Response;

    /// 去掉栈顶 Via 的响应副本
    fn strip_via(&self, response: &Response) -> Response;
}

/// 默认消息工厂
#[derive(Debug, Clone)]
pub struct DefaultMessageFactory {
    via_host: String,
    user_agent: String,
}

impl DefaultMessageFactory {
    pub fn new(via_host: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            via_host: via_host.into(),
            user_agent: user_agent.into(),
        }
    }

    /// 代理自己的 Via 条目
    fn proxy_via(&self) -> String {
        format!("SIP/2.0/TCP {};branch={}", self.via_host, make_branch())
    }

    fn make_response(&self, request: &Request, headers: &Headers, status: StatusCode) -> Response {
        let mut resp_headers = Headers::default();

        for header in headers.iter() {
            match header {
                Header::Via(v) => resp_headers.push(Header::Via(v.clone())),
                Header::From(from) => resp_headers.push(Header::From(from.clone())),
                Header::To(to) => {
                    let value = to.value();
                    if value.to_ascii_lowercase().contains(";tag=") {
                        resp_headers.push(Header::To(to.clone()));
                    } else {
                        resp_headers
                            .push(Header::To(format!("{};tag={}", value, make_tag()).into()));
                    }
                }
                Header::CallId(call_id) => resp_headers.push(Header::CallId(call_id.clone())),
                Header::CSeq(cseq) => resp_headers.push(Header::CSeq(cseq.clone())),
                _ => {}
            }
        }

        if status == StatusCode::OK {
            for header in headers.iter() {
                match header {
                    Header::Contact(contact) => {
                        resp_headers.push(Header::Contact(contact.clone()))
                    }
                    Header::Expires(expires) => {
                        resp_headers.push(Header::Expires(expires.clone()))
                    }
                    _ => {}
                }
            }
        }

        resp_headers.push(Header::ContentLength(0u32.into()));
        resp_headers.push(Header::UserAgent(self.user_agent.clone().into()));

        Response {
            status_code: status,
            version: request.version.clone(),
            headers: resp_headers,
            body: Vec::new(),
        }
    }
}

/// 读取并递减 Max-Forwards，返回新值；已为 0 时返回 None
fn decrement_max_forwards(headers: &mut Headers) -> ProxyResult<Option<u32>> {
    let current = headers.iter().find_map(|h| match h {
        Header::MaxForwards(mf) => Some(mf.value().trim().to_string()),
        _ => None,
    });

    let current = match current {
        Some(value) => value
            .parse::<u32>()
            .map_err(|_| ProxyError::malformed(format!("bad Max-Forwards: {}", value)))?,
        None => DEFAULT_MAX_FORWARDS,
    };

    if current == 0 {
        return Ok(None);
    }

    let next = current - 1;
    headers.retain(|h| !matches!(h, Header::MaxForwards(_)));
    headers.push(Header::MaxForwards(rsip::headers::MaxForwards::from(next)));
    Ok(Some(next))
}

impl MessageFactory for DefaultMessageFactory {
    fn create_invite_to_forward(
        &self,
        remote: SocketAddr,
        invite: &Request,
    ) -> ProxyResult<Option<Request>> {
        if via::via_count(&invite.headers) == 0 {
            return Err(ProxyError::malformed("INVITE without Via"));
        }

        let mut copy = invite.clone();
        via::stamp_received(&mut copy.headers, remote)?;

        if decrement_max_forwards(&mut copy.headers)?.is_none() {
            debug!("Max-Forwards 已耗尽, 不再转发: {}", invite.uri);
            return Ok(None);
        }

        via::push_via(&mut copy.headers, self.proxy_via());
        Ok(Some(copy))
    }

    fn create_register_ok(&self, register: &Request) -> Response {
        self.make_response(register, &register.headers, StatusCode::OK)
    }

    fn create_request_timeout_response(&self, request: &Request) -> Response {
        let mut headers = request.headers.clone();
        via::remove_top_via(&mut headers);
        self.make_response(request, &headers, StatusCode::RequestTimeout)
    }

    fn strip_via(&self, response: &Response) -> Response {
        let mut copy = response.clone();
        via::remove_top_via(&mut copy.headers);
        copy
    }
}
