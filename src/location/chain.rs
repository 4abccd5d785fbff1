use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use super::{LocationService, TargetSet};
use crate::sip_uri::SipUri;

/// 位置服务链
///
/// 成员在构造时固定，按顺序选择第一个 `can_handle` 为真的成员
pub struct LocationServiceChain {
    services: Vec<Arc<dyn LocationService>>,
}

impl LocationServiceChain {
    pub fn new(services: Vec<Arc<dyn LocationService>>) -> Self {
        Self { services }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn select(&self, uri: &SipUri) -> Option<&Arc<dyn LocationService>> {
        self.services.iter().find(|service| service.can_handle(uri))
    }
}

#[async_trait]
impl LocationService for LocationServiceChain {
    fn can_handle(&self, uri: &SipUri) -> bool {
        self.select(uri).is_some()
    }

    /// 调用方应先检查 `can_handle`；没有成员能处理时返回空集合
    async fn get_target_set(&self, uri: &SipUri) -> TargetSet {
        match self.select(uri) {
            Some(service) => {
                let targets = service.get_target_set(uri).await;
                debug!("{} 解析出 {} 个候选地址", uri, targets.len());
                targets
            }
            None => {
                error!("位置服务链中没有成员能处理 {}, 调用方应先检查 can_handle", uri);
                TargetSet::new()
            }
        }
    }
}
