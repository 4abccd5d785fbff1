/// 代理服务
///
/// 装配注册器、转发器、消息工厂与传输层，监听 TCP 并为每个连接启动会话
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::forwarder::{StatelessForwarder, StatelessForwarderParts};
use crate::location::{
    DnsLocationService, LocationService, LocationServiceChain, StaticLocationService,
};
use crate::message::DefaultMessageFactory;
use crate::registrar::SipRegistrar;
use crate::session::{spawn_session, SessionContext};
use crate::transport::{
    Connected, Connection, Connector, TcpConnection, TcpConnector, TransportLayer,
};

/// 代理生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Starting,
    Running,
}

/// SIP 代理
pub struct SipProxy {
    config: ProxyConfig,
    registrar: Arc<SipRegistrar>,
    transport: Arc<TransportLayer>,
    factory: Arc<DefaultMessageFactory>,
    forwarder: Arc<StatelessForwarder>,
    state: watch::Sender<ProxyState>,
}

impl SipProxy {
    /// 使用 TCP 出站连接器创建代理
    pub fn new(config: ProxyConfig) -> ProxyResult<Self> {
        Self::with_connector(config, Arc::new(TcpConnector::new()))
    }

    /// 使用指定的出站连接器创建代理
    pub fn with_connector(config: ProxyConfig, connector: Arc<dyn Connector>) -> ProxyResult<Self> {
        config.validate()?;

        let via_host = config.advertised_host();
        info!(
            "代理配置: listen={}, domains={:?}, via_host={}",
            config.listen, config.domains, via_host
        );

        let factory = Arc::new(DefaultMessageFactory::new(
            via_host,
            config.user_agent.clone(),
        ));
        let registrar = Arc::new(SipRegistrar::new(factory.clone()));
        let transport = Arc::new(TransportLayer::new());
        let location = build_location_chain(&config);

        let forwarder = StatelessForwarder::new(StatelessForwarderParts {
            domains: config.domains.clone(),
            registrar: registrar.clone(),
            transport: transport.clone(),
            factory: factory.clone(),
            location,
            connector,
            connect_timeout: config.connect_timeout,
        });

        let (state, _) = watch::channel(ProxyState::Starting);
        Ok(Self {
            config,
            registrar,
            transport,
            factory,
            forwarder,
            state,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn registrar(&self) -> &Arc<SipRegistrar> {
        &self.registrar
    }

    pub fn transport(&self) -> &Arc<TransportLayer> {
        &self.transport
    }

    pub fn forwarder(&self) -> &Arc<StatelessForwarder> {
        &self.forwarder
    }

    pub fn state(&self) -> ProxyState {
        *self.state.borrow()
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            registrar: self.registrar.clone(),
            forwarder: self.forwarder.clone(),
            factory: self.factory.clone(),
            transport: self.transport.clone(),
        }
    }

    /// 绑定监听端口并启动接收循环
    ///
    /// 绑定失败直接返回 `ProxyError::Bind`
    pub async fn start(&self) -> ProxyResult<ProxyHandle> {
        let listen = self.config.listen;
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: listen,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let accept_cancel = cancel.clone();
        let context = self.session_context();
        let transport = self.transport.clone();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => match TcpConnection::attach(stream) {
                            Ok((connection, inbound)) => {
                                debug!("接受来自 {} 的连接 {}", remote, connection.id());
                                spawn_session(
                                    context.clone(),
                                    Connected {
                                        connection,
                                        inbound,
                                    },
                                );
                            }
                            Err(e) => warn!("无法接管来自 {} 的连接: {}", remote, e),
                        },
                        Err(e) => warn!("accept 失败: {}", e),
                    },
                }
            }
            transport.close_all();
            info!("代理已停止监听 {}", local_addr);
        });

        self.state.send_replace(ProxyState::Running);
        info!("SIP 代理监听于 {}", local_addr);

        Ok(ProxyHandle {
            local_addr,
            cancel,
            join,
        })
    }

    /// 等待进入 Running，超过 `deadline` 返回 `StartupTimeout`
    pub async fn wait_until_running(&self, deadline: Duration) -> ProxyResult<()> {
        let mut state = self.state.subscribe();
        let running = tokio::time::timeout(deadline, async move {
            state
                .wait_for(|s| *s == ProxyState::Running)
                .await
                .is_ok()
        })
        .await;
        match running {
            Ok(true) => Ok(()),
            _ => Err(ProxyError::StartupTimeout(deadline.as_millis() as u64)),
        }
    }

    /// 等待所有后台转发任务结束
    pub async fn wait_idle(&self) {
        self.forwarder.wait_idle().await
    }
}

fn build_location_chain(config: &ProxyConfig) -> Arc<dyn LocationService> {
    let mut services: Vec<Arc<dyn LocationService>> = Vec::new();
    if !config.static_routes.is_empty() {
        services.push(Arc::new(StaticLocationService::new(&config.static_routes)));
    }
    if let Some(peer) = &config.dns_peer {
        services.push(Arc::new(DnsLocationService::new(peer)));
    }
    debug!("位置服务链包含 {} 个成员", services.len());
    Arc::new(LocationServiceChain::new(services))
}

/// 运行中的代理句柄
pub struct ProxyHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ProxyHandle {
    /// 实际监听地址（端口 0 时为系统分配的端口）
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止接收新连接并关闭现有连接
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("接收循环异常退出: {}", e);
        }
    }
}
