use std::collections::HashSet;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use rsip::prelude::*;
use rsip::{Request, SipMessage};
use tracing::{debug, info, warn};

use super::{Registrar, RegistrationListener};
use crate::error::{ProxyError, ProxyResult};
use crate::message::MessageFactory;
use crate::sip_uri::SipUri;
use crate::transport::{Connection, ConnectionId, ConnectionRef};

/// 绑定：只持有连接的弱引用，连接生命周期归传输层
struct Binding {
    connection: Weak<dyn Connection>,
    id: ConnectionId,
}

impl Binding {
    fn new(connection: &ConnectionRef) -> Self {
        Self {
            connection: Arc::downgrade(connection),
            id: connection.id(),
        }
    }

    fn live(&self) -> Option<ConnectionRef> {
        self.connection.upgrade().filter(|conn| conn.is_open())
    }
}

/// 内存注册表
///
/// `bindings` 为主表，`by_connection` 为连接到 AOR 的反向索引。
/// 写入时先持有主表分片再更新反向索引，关闭清理时先摘下反向索引再逐个删除主表项，
/// 两处不会以相反顺序同时持锁
pub struct SipRegistrar {
    bindings: DashMap<SipUri, Binding>,
    by_connection: DashMap<ConnectionId, HashSet<SipUri>>,
    listeners: RwLock<Vec<Arc<dyn RegistrationListener>>>,
    factory: Arc<dyn MessageFactory>,
}

impl SipRegistrar {
    pub fn new(factory: Arc<dyn MessageFactory>) -> Self {
        Self {
            bindings: DashMap::new(),
            by_connection: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            factory,
        }
    }

    /// 当前绑定数量（含尚未清理的失效绑定）
    pub fn registration_count(&self) -> usize {
        self.bindings.len()
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn RegistrationListener>> {
        self.listeners.read().clone()
    }

    fn notify_registered(&self, uri: &SipUri) {
        for listener in self.listeners_snapshot() {
            listener.on_registered(uri);
        }
    }

    fn notify_unregistered(&self, uri: &SipUri) {
        for listener in self.listeners_snapshot() {
            listener.on_unregistered(uri);
        }
    }

    fn bind(&self, uri: &SipUri, connection: &ConnectionRef) {
        let id = connection.id();
        let mut entry = self
            .bindings
            .entry(uri.clone())
            .or_insert_with(|| Binding::new(connection));

        if entry.id != id {
            let previous = entry.id;
            *entry = Binding::new(connection);
            if let Some(mut uris) = self.by_connection.get_mut(&previous) {
                uris.remove(uri);
            }
            self.by_connection.remove_if(&previous, |_, uris| uris.is_empty());
            debug!("{} 的绑定从 {} 转移到 {}", uri, previous, id);
        } else {
            // 同一连接刷新，或新建；弱引用同样刷新
            *entry = Binding::new(connection);
        }

        self.by_connection
            .entry(id)
            .or_default()
            .insert(uri.clone());
    }
}

/// 从 From 头提取 AOR
fn address_of_record(register: &Request) -> ProxyResult<SipUri> {
    let from = register
        .from_header()
        .map_err(|e| ProxyError::malformed(format!("REGISTER without From: {}", e)))?;
    let from = from
        .typed()
        .map_err(|e| ProxyError::malformed(format!("unparseable From: {}", e)))?;
    SipUri::try_from(&from.uri)
}

impl Registrar for SipRegistrar {
    fn handle_register(&self, register: &Request, connection: &ConnectionRef) -> ProxyResult<()> {
        let uri = address_of_record(register)?;
        self.bind(&uri, connection);
        info!("注册 {} -> {} ({})", uri, connection.remote_addr(), connection.id());

        let ok = self.factory.create_register_ok(register);
        if let Err(e) = connection.send(SipMessage::Response(ok)) {
            warn!("向 {} 发送 REGISTER 200 OK 失败: {}", connection.remote_addr(), e);
        }

        self.notify_registered(&uri);
        Ok(())
    }

    fn lookup(&self, uri: &SipUri) -> Option<ConnectionRef> {
        self.bindings.get(uri).and_then(|binding| binding.live())
    }

    fn has_registration(&self, uri: &SipUri) -> bool {
        self.lookup(uri).is_some()
    }

    fn session_closed(&self, connection: &ConnectionRef) {
        let id = connection.id();
        let uris = match self.by_connection.remove(&id) {
            Some((_, uris)) => uris,
            None => {
                warn!("连接 {} 关闭, 但没有对应的注册", id);
                return;
            }
        };

        for uri in uris {
            let removed = self
                .bindings
                .remove_if(&uri, |_, binding| binding.id == id)
                .is_some();
            if removed {
                info!("连接 {} 关闭, 移除注册 {}", id, uri);
                self.notify_unregistered(&uri);
            }
        }
    }

    fn add_registration_listener(&self, listener: Arc<dyn RegistrationListener>) {
        self.listeners.write().push(listener);
    }
}
