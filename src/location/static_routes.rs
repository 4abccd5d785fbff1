use std::collections::HashMap;

use async_trait::async_trait;

use super::{LocationService, TargetSet};
use crate::config::{RouteKey, StaticRoute};
use crate::sip_uri::SipUri;

/// 静态路由位置服务
///
/// 精确 AOR 匹配优先于域匹配
#[derive(Debug, Default, Clone)]
pub struct StaticLocationService {
    by_aor: HashMap<SipUri, TargetSet>,
    by_domain: HashMap<String, TargetSet>,
}

impl StaticLocationService {
    pub fn new(routes: &[StaticRoute]) -> Self {
        let mut service = Self::default();
        for route in routes {
            service.add_route(route.clone());
        }
        service
    }

    /// 添加路由，同一键的目标按添加顺序追加
    pub fn add_route(&mut self, route: StaticRoute) {
        let targets = match route.key {
            RouteKey::Aor(aor) => self.by_aor.entry(aor).or_default(),
            RouteKey::Domain(domain) => self.by_domain.entry(domain).or_default(),
        };
        for target in route.targets {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_aor.is_empty() && self.by_domain.is_empty()
    }

    fn lookup(&self, uri: &SipUri) -> Option<&TargetSet> {
        self.by_aor
            .get(uri)
            .or_else(|| self.by_domain.get(uri.domain()))
    }
}

#[async_trait]
impl LocationService for StaticLocationService {
    fn can_handle(&self, uri: &SipUri) -> bool {
        self.lookup(uri).is_some()
    }

    async fn get_target_set(&self, uri: &SipUri) -> TargetSet {
        self.lookup(uri).cloned().unwrap_or_default()
    }
}
