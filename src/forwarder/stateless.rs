use std::sync::{Arc, Weak};
use std::time::Duration;

use rsip::{Request, Response};
use tracing::{debug, warn};

use super::{
    ExternalDomainForwarder, RequestAndResponseForwarder, RequestForwarder,
    UnregisteredUriForwarder,
};
use crate::error::{ProxyError, ProxyResult};
use crate::location::LocationService;
use crate::message::{via, MessageFactory};
use crate::registrar::Registrar;
use crate::sip_uri::SipUri;
use crate::transport::{Connector, Transport};

/// 无状态转发器
///
/// 请求：本域且已注册时直接写到注册连接；本域未注册时交给未注册 URI 转发器；
/// 外部域交给外部域转发器。
/// 响应：至少需要两个 Via（代理自己的加上发送方的），去掉栈顶后按新栈顶回送
pub struct StatelessForwarder {
    domains: Vec<String>,
    registrar: Arc<dyn Registrar>,
    transport: Arc<dyn Transport>,
    factory: Arc<dyn MessageFactory>,
    unregistered: UnregisteredUriForwarder,
    external: Arc<dyn RequestForwarder>,
}

/// 构造参数
pub struct StatelessForwarderParts {
    pub domains: Vec<String>,
    pub registrar: Arc<dyn Registrar>,
    pub transport: Arc<dyn Transport>,
    pub factory: Arc<dyn MessageFactory>,
    pub location: Arc<dyn LocationService>,
    pub connector: Arc<dyn Connector>,
    pub connect_timeout: Duration,
}

impl StatelessForwarder {
    /// 创建转发器
    ///
    /// 未注册 URI 转发器持有指回本转发器的弱引用，用于给新建的出站连接绑定分发器
    pub fn new(parts: StatelessForwarderParts) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<StatelessForwarder>| {
            let back: Weak<dyn RequestAndResponseForwarder> = weak.clone();
            let unregistered = UnregisteredUriForwarder::new(
                parts.location,
                parts.transport.clone(),
                parts.registrar.clone(),
                parts.factory.clone(),
                parts.connector,
                parts.connect_timeout,
                back,
            );
            StatelessForwarder {
                domains: parts
                    .domains
                    .iter()
                    .map(|d| d.to_ascii_lowercase())
                    .collect(),
                registrar: parts.registrar,
                transport: parts.transport,
                factory: parts.factory,
                unregistered,
                external: Arc::new(ExternalDomainForwarder::new()),
            }
        })
    }

    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
    }

    pub fn unregistered(&self) -> &UnregisteredUriForwarder {
        &self.unregistered
    }

    /// 等待所有后台转发结束
    pub async fn wait_idle(&self) {
        self.unregistered.wait_idle().await
    }
}

impl RequestForwarder for StatelessForwarder {
    fn forward_sip_request(&self, request: Request) -> ProxyResult<()> {
        let uri = SipUri::try_from(&request.uri).map_err(|e| {
            warn!("无法解析请求 URI {}, 丢弃: {}", request.uri, e);
            e
        })?;

        if !self.is_local_domain(uri.domain()) {
            debug!("{} 属于外部域", uri);
            return self.external.forward_sip_request(request);
        }

        match self.registrar.lookup(&uri) {
            Some(connection) => {
                debug!("{} 已注册, 直接写到 {}", uri, connection.remote_addr());
                self.transport.write_request_statelessly(&request, &connection)
            }
            None => {
                debug!("{} 未注册, 交给位置服务", uri);
                self.unregistered.forward_sip_request(request)
            }
        }
    }
}

impl RequestAndResponseForwarder for StatelessForwarder {
    fn forward_sip_response(&self, response: &Response) -> ProxyResult<()> {
        let found = via::via_count(&response.headers);
        if found < 2 {
            return Err(ProxyError::InsufficientRouting { found });
        }

        let stripped = self.factory.strip_via(response);
        self.transport.write_response(&stripped)
    }
}
