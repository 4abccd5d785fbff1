use rsip::Request;
use tracing::warn;

use super::RequestForwarder;
use crate::error::ProxyResult;

/// 外部域转发器
///
/// 外部域的转发策略（DNS 查找、网关选择等）尚未定义，目前只记录并丢弃
#[derive(Debug, Default, Clone)]
pub struct ExternalDomainForwarder;

impl ExternalDomainForwarder {
    pub fn new() -> Self {
        Self
    }
}

impl RequestForwarder for ExternalDomainForwarder {
    fn forward_sip_request(&self, request: Request) -> ProxyResult<()> {
        warn!("不转发外部域请求: {} {}", request.method, request.uri);
        Ok(())
    }
}
