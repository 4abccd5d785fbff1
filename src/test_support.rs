//! 测试辅助：内存连接、脚本化连接器、记录型监听器以及 SIP 消息样例
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use rsip::{Request, Response, SipMessage};
use tokio::sync::mpsc;

use crate::error::{ProxyError, ProxyResult};
use crate::forwarder::{StatelessForwarder, StatelessForwarderParts, UnregisteredUriForwarder};
use crate::location::LocationService;
use crate::message::{DefaultMessageFactory, MessageFactory};
use crate::registrar::{RegistrationListener, SipRegistrar};
use crate::session::SessionContext;
use crate::sip_uri::SipUri;
use crate::transport::{
    Connected, Connection, ConnectionId, ConnectionRef, Connector, Transport, TransportLayer,
};

/// 内存连接：记录发出的消息，可注入入站消息
pub struct MockConnection {
    id: ConnectionId,
    remote: SocketAddr,
    open: AtomicBool,
    sent: Mutex<Vec<SipMessage>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<SipMessage>>>,
}

impl MockConnection {
    pub fn new(remote: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            remote,
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(None),
        })
    }

    /// 创建带入站消息流的连接，关闭连接时流结束
    pub fn with_inbound(remote: SocketAddr) -> (Arc<Self>, BoxStream<'static, SipMessage>) {
        let conn = Self::new(remote);
        let (tx, rx) = mpsc::unbounded_channel();
        *conn.inbound.lock() = Some(tx);
        let inbound = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })
        .boxed();
        (conn, inbound)
    }

    pub fn inject(&self, message: SipMessage) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.send(message);
        }
    }

    pub fn sent(&self) -> Vec<SipMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_requests(&self) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                SipMessage::Request(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_responses(&self) -> Vec<Response> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                SipMessage::Response(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&self, message: SipMessage) -> ProxyResult<()> {
        if !self.is_open() {
            return Err(ProxyError::ConnectionClosed(self.id));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.inbound.lock().take();
    }
}

/// 连接脚本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectScript {
    Accept,
    Refuse,
    /// 永不完成，由调用方超时
    Hang,
    /// 返回不可恢复的错误
    Broken,
}

/// 脚本化连接器：未配置的地址一律拒绝
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<SocketAddr, ConnectScript>>,
    attempts: Mutex<Vec<SocketAddr>>,
    opened: Mutex<Vec<Arc<MockConnection>>>,
}

impl ScriptedConnector {
    pub fn script(&self, addr: &str, script: ConnectScript) {
        let addr: SocketAddr = addr.parse().expect("bad test address");
        self.scripts.lock().insert(addr, script);
    }

    pub fn attempts(&self) -> Vec<SocketAddr> {
        self.attempts.lock().clone()
    }

    pub fn opened(&self) -> Vec<Arc<MockConnection>> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, addr: SocketAddr) -> ProxyResult<Connected> {
        self.attempts.lock().push(addr);
        let script = self
            .scripts
            .lock()
            .get(&addr)
            .copied()
            .unwrap_or(ConnectScript::Refuse);

        match script {
            ConnectScript::Accept => {
                let (conn, inbound) = MockConnection::with_inbound(addr);
                self.opened.lock().push(conn.clone());
                Ok(Connected {
                    connection: conn,
                    inbound,
                })
            }
            ConnectScript::Refuse => Err(ProxyError::connect_failure(addr, "connection refused")),
            ConnectScript::Hang => {
                std::future::pending::<()>().await;
                Err(ProxyError::connect_failure(addr, "unreachable"))
            }
            ConnectScript::Broken => Err(ProxyError::malformed("request cannot be sent")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Registered(SipUri),
    Unregistered(SipUri),
}

/// 记录注册事件的监听器
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }
}

impl RegistrationListener for RecordingListener {
    fn on_registered(&self, uri: &SipUri) {
        self.events.lock().push(ListenerEvent::Registered(uri.clone()));
    }

    fn on_unregistered(&self, uri: &SipUri) {
        self.events.lock().push(ListenerEvent::Unregistered(uri.clone()));
    }
}

/// 用内存组件装配的代理核心，管理域为 example.org
pub struct TestProxy {
    pub registrar: Arc<SipRegistrar>,
    pub transport: Arc<TransportLayer>,
    pub factory: Arc<DefaultMessageFactory>,
    pub connector: Arc<ScriptedConnector>,
    pub forwarder: Arc<StatelessForwarder>,
}

impl TestProxy {
    pub fn new(location: Arc<dyn LocationService>) -> Self {
        let factory = Arc::new(DefaultMessageFactory::new("192.0.2.10", "sip-proxy/test"));
        let registrar = Arc::new(SipRegistrar::new(factory.clone()));
        let transport = Arc::new(TransportLayer::new());
        let connector = Arc::new(ScriptedConnector::default());
        let forwarder = StatelessForwarder::new(StatelessForwarderParts {
            domains: vec!["example.org".to_string()],
            registrar: registrar.clone(),
            transport: transport.clone(),
            factory: factory.clone(),
            location,
            connector: connector.clone(),
            connect_timeout: Duration::from_millis(100),
        });
        Self {
            registrar,
            transport,
            factory,
            connector,
            forwarder,
        }
    }

    pub fn unregistered(&self) -> &UnregisteredUriForwarder {
        self.forwarder.unregistered()
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            registrar: self.registrar.clone(),
            forwarder: self.forwarder.clone(),
            factory: self.factory.clone(),
            transport: self.transport.clone(),
        }
    }

    /// 模拟 `sender` 发来的 INVITE 经代理处理后的转发副本；发送方连接已登记
    pub fn forwarded_invite(&self, target: &str, sender: &str) -> (Arc<MockConnection>, Request) {
        let sender: SocketAddr = sender.parse().expect("bad test address");
        let conn = MockConnection::new(sender);
        let conn_ref: ConnectionRef = conn.clone();
        self.transport.add_connection(conn_ref);

        let invite = fixtures::invite(target, &["SIP/2.0/TCP 192.168.1.2:5060;branch=z9hG4bKcaller"]);
        let copy = self
            .factory
            .create_invite_to_forward(sender, &invite)
            .expect("forwardable invite")
            .expect("max-forwards not exhausted");
        (conn, copy)
    }
}

/// 轮询直到条件成立，最多 2 秒
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub mod fixtures {
    use rsip::{Header, Headers, Method, Request, Response, Version};

    fn uri(value: &str) -> rsip::Uri {
        rsip::Uri::try_from(value).expect("valid test URI")
    }

    fn with_vias(vias: &[&str]) -> Headers {
        let mut headers = Headers::default();
        for via in vias {
            headers.push(Header::Via(via.to_string().into()));
        }
        headers
    }

    pub fn invite(target: &str, vias: &[&str]) -> Request {
        let mut headers = with_vias(vias);
        headers.push(Header::From(
            "<sip:carol@example.net>;tag=caller1".to_string().into(),
        ));
        headers.push(Header::To(format!("<{}>", target).into()));
        headers.push(Header::CallId("call-1@192.168.1.2".to_string().into()));
        headers.push(Header::CSeq("1 INVITE".to_string().into()));
        headers.push(Header::Contact(
            "<sip:carol@192.168.1.2:5060;transport=tcp>".to_string().into(),
        ));
        headers.push(Header::ContentLength(0u32.into()));

        Request {
            method: Method::Invite,
            uri: uri(target),
            version: Version::V2,
            headers,
            body: Vec::new(),
        }
    }

    pub fn register(aor: &str) -> Request {
        register_with_headers(aor, None)
    }

    pub fn register_with_expires(aor: &str, expires: u32) -> Request {
        register_with_headers(aor, Some(expires))
    }

    fn register_with_headers(aor: &str, expires: Option<u32>) -> Request {
        let mut headers = with_vias(&["SIP/2.0/TCP 10.1.1.1:5060;branch=z9hG4bKreg"]);
        headers.push(Header::From(format!("<{}>;tag=reg1", aor).into()));
        headers.push(Header::To(format!("<{}>", aor).into()));
        headers.push(Header::CallId(format!("reg-{}", aor).into()));
        headers.push(Header::CSeq("1 REGISTER".to_string().into()));
        headers.push(Header::Contact(
            "<sip:client@10.1.1.1:5060;transport=tcp>".to_string().into(),
        ));
        if let Some(expires) = expires {
            headers.push(Header::Expires(expires.to_string().into()));
        }
        headers.push(Header::ContentLength(0u32.into()));

        let domain = aor.rsplit('@').next().unwrap_or(aor);
        Request {
            method: Method::Register,
            uri: uri(&format!("sip:{}", domain)),
            version: Version::V2,
            headers,
            body: Vec::new(),
        }
    }

    pub fn response(code: u16, vias: &[&str]) -> Response {
        let mut headers = with_vias(vias);
        headers.push(Header::From(
            "<sip:carol@example.net>;tag=caller1".to_string().into(),
        ));
        headers.push(Header::To(
            "<sip:alice@example.org>;tag=callee1".to_string().into(),
        ));
        headers.push(Header::CallId("call-1@192.168.1.2".to_string().into()));
        headers.push(Header::CSeq("1 INVITE".to_string().into()));
        headers.push(Header::ContentLength(0u32.into()));

        Response {
            status_code: code.into(),
            version: Version::V2,
            headers,
            body: Vec::new(),
        }
    }
}
