use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use rsip::Request;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{RequestAndResponseForwarder, RequestForwarder};
use crate::error::{ProxyError, ProxyResult};
use crate::location::LocationService;
use crate::message::{via, MessageFactory};
use crate::registrar::Registrar;
use crate::session::{spawn_session, SessionContext};
use crate::sip_uri::SipUri;
use crate::transport::{Connector, Transport};

/// 一次后台转发的最终结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// 请求已写出
    Forwarded,
    /// 没有可用目标，已向发送方回送 408
    TimedOut,
    /// 连 408 都无法回送
    Dropped,
}

/// 未注册 URI 转发器
///
/// 在后台任务中解析位置服务、复用或新建连接并依次尝试候选地址，
/// 不阻塞连接上的消息分发
#[derive(Clone)]
pub struct UnregisteredUriForwarder {
    inner: Arc<ForwarderInner>,
}

struct ForwarderInner {
    location: Arc<dyn LocationService>,
    transport: Arc<dyn Transport>,
    registrar: Arc<dyn Registrar>,
    factory: Arc<dyn MessageFactory>,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    proxy: Weak<dyn RequestAndResponseForwarder>,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// 任务结束（包括 panic）时递减计数
struct InFlight(Arc<ForwarderInner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl UnregisteredUriForwarder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        location: Arc<dyn LocationService>,
        transport: Arc<dyn Transport>,
        registrar: Arc<dyn Registrar>,
        factory: Arc<dyn MessageFactory>,
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
        proxy: Weak<dyn RequestAndResponseForwarder>,
    ) -> Self {
        Self {
            inner: Arc::new(ForwarderInner {
                location,
                transport,
                registrar,
                factory,
                connector,
                connect_timeout,
                proxy,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// 提交后台转发任务
    pub fn spawn_forward(&self, request: Request) -> ProxyResult<JoinHandle<ForwardOutcome>> {
        let uri = SipUri::try_from(&request.uri)?;
        debug!("提交后台转发: {}", uri);

        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(self.inner.clone());
        Ok(tokio::spawn(async move {
            let outcome = guard.0.forward(uri, request).await;
            drop(guard);
            outcome
        }))
    }

    /// 正在进行的转发任务数
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// 等待所有转发任务结束
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl RequestForwarder for UnregisteredUriForwarder {
    fn forward_sip_request(&self, request: Request) -> ProxyResult<()> {
        self.spawn_forward(request).map(|_| ())
    }
}

impl ForwarderInner {
    async fn forward(&self, uri: SipUri, request: Request) -> ForwardOutcome {
        if !self.location.can_handle(&uri) {
            info!("没有位置服务能处理 {}, 回送 408", uri);
            return self.send_request_timeout(&request);
        }

        let targets = self.location.get_target_set(&uri).await;
        if targets.is_empty() {
            info!("{} 没有候选地址, 回送 408", uri);
            return self.send_request_timeout(&request);
        }

        if self.transport.has_connection_for_any(&targets) {
            match self.transport.write_request(&targets, &request) {
                Ok(()) => {
                    debug!("经已有连接转发 {}", uri);
                    return ForwardOutcome::Forwarded;
                }
                Err(e) => warn!("已有连接写入失败, 尝试新建连接: {}", e),
            }
        }

        for target in &targets {
            match self.connect_and_send(*target, &request).await {
                Ok(()) => {
                    info!("已通过新连接将 {} 转发到 {}", uri, target);
                    return ForwardOutcome::Forwarded;
                }
                Err(e) if e.is_recoverable() => {
                    info!("无法转发到 {} ({}): {}", target, e.error_code(), e);
                }
                Err(e) => {
                    warn!("转发到 {} 失败且不可重试 ({}): {}", target, e.error_code(), e);
                    break;
                }
            }
        }

        info!("{} 的 {} 个候选地址都没有转发成功, 回送 408", uri, targets.len());
        self.send_request_timeout(&request)
    }

    async fn connect_and_send(&self, target: SocketAddr, request: &Request) -> ProxyResult<()> {
        let connected = tokio::time::timeout(self.connect_timeout, self.connector.connect(target))
            .await
            .map_err(|_| ProxyError::connect_timeout(target, self.connect_timeout))??;

        let proxy = match self.proxy.upgrade() {
            Some(proxy) => proxy,
            None => {
                connected.connection.close();
                return Err(ProxyError::connect_failure(target, "proxy is shutting down"));
            }
        };

        let connection = connected.connection.clone();
        let context = SessionContext {
            registrar: self.registrar.clone(),
            forwarder: proxy,
            factory: self.factory.clone(),
            transport: self.transport.clone(),
        };
        spawn_session(context, connected);

        self.transport.write_request_statelessly(request, &connection)
    }

    /// 按请求自身的 Via 回送 408 (RFC 3261 16.6 第 7 步)
    fn send_request_timeout(&self, request: &Request) -> ForwardOutcome {
        let timeout = self.factory.create_request_timeout_response(request);
        let next_hop = match via::next_hop(&timeout.headers) {
            Ok(addr) => addr,
            Err(e) => {
                warn!("无法从 Via 得到 408 的下一跳, 丢弃: {}", e);
                return ForwardOutcome::Dropped;
            }
        };
        match self.transport.write_response_to(next_hop, &timeout) {
            Ok(()) => ForwardOutcome::TimedOut,
            Err(e) => {
                warn!("发送 408 到 {} 失败: {}", next_hop, e);
                ForwardOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{LocationServiceChain, StaticLocationService, TargetSet};
    use crate::test_support::{fixtures, ConnectScript, MockConnection, TestProxy};
    use crate::transport::{Connection, ConnectionRef};

    fn routes(spec: &str) -> Arc<dyn LocationService> {
        Arc::new(StaticLocationService::new(&[spec.parse().unwrap()]))
    }

    #[tokio::test]
    async fn test_no_handler_sends_single_timeout() {
        let proxy = TestProxy::new(Arc::new(LocationServiceChain::new(Vec::new())));
        let (sender, request) = proxy.forwarded_invite("sip:bob@example.org", "203.0.113.7:40000");

        let outcome = proxy
            .unregistered()
            .spawn_forward(request)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, ForwardOutcome::TimedOut);
        let responses = sender.sent_responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status_code, rsip::StatusCode::RequestTimeout);
        assert!(proxy.connector.attempts().is_empty());
    }

    /// 能处理任意 URI，但解析结果为空
    struct EmptyResolver;

    #[async_trait::async_trait]
    impl LocationService for EmptyResolver {
        fn can_handle(&self, _uri: &SipUri) -> bool {
            true
        }

        async fn get_target_set(&self, _uri: &SipUri) -> TargetSet {
            TargetSet::new()
        }
    }

    #[tokio::test]
    async fn test_empty_target_set_opens_no_connection() {
        let resolver: Arc<dyn LocationService> = Arc::new(EmptyResolver);
        let proxy = TestProxy::new(Arc::new(LocationServiceChain::new(vec![resolver])));
        let (sender, request) = proxy.forwarded_invite("sip:bob@example.org", "203.0.113.7:40000");

        let outcome = proxy.unregistered().spawn_forward(request).unwrap().await.unwrap();

        assert_eq!(outcome, ForwardOutcome::TimedOut);
        let responses = sender.sent_responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status_code, rsip::StatusCode::RequestTimeout);
        assert!(proxy.connector.attempts().is_empty());
        assert!(proxy.connector.opened().is_empty());
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_stops_candidate_loop() {
        let proxy = TestProxy::new(routes("example.org=10.0.0.1:5060,10.0.0.2:5060"));
        proxy.connector.script("10.0.0.1:5060", ConnectScript::Broken);
        proxy.connector.script("10.0.0.2:5060", ConnectScript::Accept);
        let (sender, request) = proxy.forwarded_invite("sip:bob@example.org", "203.0.113.7:40000");

        let outcome = proxy.unregistered().spawn_forward(request).unwrap().await.unwrap();

        assert_eq!(outcome, ForwardOutcome::TimedOut);
        assert_eq!(
            proxy.connector.attempts(),
            vec!["10.0.0.1:5060".parse::<SocketAddr>().unwrap()]
        );
        assert_eq!(sender.sent_responses().len(), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_kth_candidate_and_stops() {
        let proxy = TestProxy::new(routes(
            "example.org=10.0.0.1:5060,10.0.0.2:5060,10.0.0.3:5060,10.0.0.4:5060",
        ));
        proxy.connector.script("10.0.0.1:5060", ConnectScript::Refuse);
        proxy.connector.script("10.0.0.2:5060", ConnectScript::Hang);
        proxy.connector.script("10.0.0.3:5060", ConnectScript::Accept);
        proxy.connector.script("10.0.0.4:5060", ConnectScript::Accept);
        let (sender, request) = proxy.forwarded_invite("sip:bob@example.org", "203.0.113.7:40000");

        let outcome = proxy.unregistered().spawn_forward(request).unwrap().await.unwrap();

        assert_eq!(outcome, ForwardOutcome::Forwarded);
        let attempts = proxy.connector.attempts();
        assert_eq!(
            attempts,
            vec![
                "10.0.0.1:5060".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:5060".parse().unwrap(),
                "10.0.0.3:5060".parse().unwrap(),
            ]
        );
        let opened = proxy.connector.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].sent_requests().len(), 1);
        assert!(sender.sent().is_empty());
        // 新连接已登记到传输层
        assert!(proxy
            .transport
            .has_connection_for_any(&["10.0.0.3:5060".parse().unwrap()]));
    }

    #[tokio::test]
    async fn test_all_candidates_fail_sends_timeout() {
        let proxy = TestProxy::new(routes("example.org=10.0.0.1:5060,10.0.0.2:5060"));
        let (sender, request) = proxy.forwarded_invite("sip:bob@example.org", "203.0.113.7:40000");

        let outcome = proxy.unregistered().spawn_forward(request).unwrap().await.unwrap();

        assert_eq!(outcome, ForwardOutcome::TimedOut);
        assert_eq!(proxy.connector.attempts().len(), 2);
        let responses = sender.sent_responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(via::via_count(&responses[0].headers), 1);
    }

    #[tokio::test]
    async fn test_existing_connection_is_reused() {
        let proxy = TestProxy::new(routes("example.org=10.0.0.1:5060,10.0.0.2:5060"));
        let existing = MockConnection::new("10.0.0.2:5060".parse().unwrap());
        let existing_ref: ConnectionRef = existing.clone();
        proxy.transport.add_connection(existing_ref);
        let (_sender, request) = proxy.forwarded_invite("sip:bob@example.org", "203.0.113.7:40000");

        let outcome = proxy.unregistered().spawn_forward(request).unwrap().await.unwrap();

        assert_eq!(outcome, ForwardOutcome::Forwarded);
        assert_eq!(existing.sent_requests().len(), 1);
        assert!(proxy.connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_dropped_when_sender_gone() {
        let proxy = TestProxy::new(Arc::new(LocationServiceChain::new(Vec::new())));
        let (sender, request) = proxy.forwarded_invite("sip:bob@example.org", "203.0.113.7:40000");
        sender.close();

        let outcome = proxy.unregistered().spawn_forward(request).unwrap().await.unwrap();
        assert_eq!(outcome, ForwardOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let proxy = TestProxy::new(routes("example.org=10.0.0.1:5060"));
        proxy.connector.script("10.0.0.1:5060", ConnectScript::Accept);
        let (_sender, request) = proxy.forwarded_invite("sip:bob@example.org", "203.0.113.7:40000");

        proxy.unregistered().forward_sip_request(request).unwrap();
        tokio::time::timeout(Duration::from_secs(5), proxy.unregistered().wait_idle())
            .await
            .unwrap();
        assert_eq!(proxy.unregistered().in_flight(), 0);
        assert_eq!(proxy.connector.opened().len(), 1);
    }
}
