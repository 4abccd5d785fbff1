use async_trait::async_trait;
use tracing::{debug, warn};

use super::{LocationService, TargetSet};
use crate::sip_uri::{SipUri, UriScheme, DEFAULT_SIP_PORT};

/// DNS 位置服务
///
/// 把对端代理集群的主机名解析为全部地址。能处理任意 URI，应放在链尾
#[derive(Debug, Clone)]
pub struct DnsLocationService {
    peer: SipUri,
}

impl DnsLocationService {
    /// `peer` 形如 `proxies.example.org` 或 `proxies.example.org:5070`
    pub fn new(peer: &str) -> Self {
        let peer = peer.trim();
        let (host, port) = match peer.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
                Ok(port) => (host, port),
                Err(_) => (peer, DEFAULT_SIP_PORT),
            },
            _ => (peer, DEFAULT_SIP_PORT),
        };
        Self {
            peer: SipUri::new(UriScheme::Sip, None, host, Some(port)),
        }
    }

    pub fn host(&self) -> &str {
        self.peer.host()
    }

    pub fn port(&self) -> u16 {
        self.peer.port()
    }
}

#[async_trait]
impl LocationService for DnsLocationService {
    fn can_handle(&self, _uri: &SipUri) -> bool {
        true
    }

    async fn get_target_set(&self, uri: &SipUri) -> TargetSet {
        match self.peer.resolve().await {
            Ok(addrs) => {
                let mut targets = TargetSet::new();
                for addr in addrs {
                    if !targets.contains(&addr) {
                        targets.push(addr);
                    }
                }
                debug!("{} 通过 {} 解析出 {:?}", uri, self.peer, targets);
                targets
            }
            Err(e) => {
                warn!("解析对端代理 {} 失败: {}", self.peer, e);
                TargetSet::new()
            }
        }
    }
}
