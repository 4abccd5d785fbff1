/// 连接表
///
/// 以对端地址为键保存活动连接，供转发器按地址或按 Via 写消息
use std::net::SocketAddr;

use dashmap::DashMap;
use rsip::{Request, Response, SipMessage};
use tracing::{debug, warn};

use super::{ConnectionRef, Transport};
use crate::error::{ProxyError, ProxyResult};
use crate::message::via;

#[derive(Default)]
pub struct TransportLayer {
    connections: DashMap<SocketAddr, ConnectionRef>,
}

impl TransportLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前登记的连接数量
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// 按地址取出活动连接
    pub fn connection_for(&self, addr: &SocketAddr) -> Option<ConnectionRef> {
        self.connections
            .get(addr)
            .map(|entry| entry.value().clone())
            .filter(|conn| conn.is_open())
    }

    /// 关闭并清空所有连接
    pub fn close_all(&self) {
        for entry in self.connections.iter() {
            entry.value().close();
        }
        self.connections.clear();
    }
}

impl Transport for TransportLayer {
    fn add_connection(&self, connection: ConnectionRef) {
        let addr = connection.remote_addr();
        debug!("登记连接 {} -> {}", connection.id(), addr);
        if let Some(previous) = self.connections.insert(addr, connection) {
            debug!("替换到 {} 的旧连接 {}", addr, previous.id());
        }
    }

    fn remove_connection(&self, connection: &ConnectionRef) {
        let id = connection.id();
        let removed = self
            .connections
            .remove_if(&connection.remote_addr(), |_, current| current.id() == id);
        if removed.is_some() {
            debug!("移除连接 {}", id);
        }
    }

    fn has_connection_for_any(&self, addresses: &[SocketAddr]) -> bool {
        addresses
            .iter()
            .any(|addr| self.connection_for(addr).is_some())
    }

    fn write_request_statelessly(
        &self,
        request: &Request,
        connection: &ConnectionRef,
    ) -> ProxyResult<()> {
        if !connection.is_open() {
            return Err(ProxyError::ConnectionClosed(connection.id()));
        }
        connection.send(SipMessage::Request(request.clone()))
    }

    fn write_request(&self, addresses: &[SocketAddr], request: &Request) -> ProxyResult<()> {
        let connection = addresses
            .iter()
            .find_map(|addr| self.connection_for(addr));
        match connection {
            Some(conn) => self.write_request_statelessly(request, &conn),
            None => match addresses.first() {
                Some(addr) => Err(ProxyError::NoConnection(*addr)),
                None => Err(ProxyError::ResolutionFailure(
                    "empty address list".to_string(),
                )),
            },
        }
    }

    fn write_response(&self, response: &Response) -> ProxyResult<()> {
        let addr = via::next_hop(&response.headers)?;
        self.write_response_to(addr, response)
    }

    fn write_response_to(&self, address: SocketAddr, response: &Response) -> ProxyResult<()> {
        match self.connection_for(&address) {
            Some(conn) => conn.send(SipMessage::Response(response.clone())),
            None => {
                warn!("没有到 {} 的连接, 无法发送 {} 响应", address, response.status_code);
                Err(ProxyError::NoConnection(address))
            }
        }
    }
}
