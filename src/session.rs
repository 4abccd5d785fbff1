/// 连接会话驱动
///
/// 登记连接、绑定分发器、按到达顺序分发入站消息，连接结束后通知注册器并从传输层移除
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::dispatcher::MessageDispatcher;
use crate::forwarder::RequestAndResponseForwarder;
use crate::message::MessageFactory;
use crate::registrar::Registrar;
use crate::transport::{Connected, Transport};

/// 会话所需的共享组件
#[derive(Clone)]
pub struct SessionContext {
    pub registrar: Arc<dyn Registrar>,
    pub forwarder: Arc<dyn RequestAndResponseForwarder>,
    pub factory: Arc<dyn MessageFactory>,
    pub transport: Arc<dyn Transport>,
}

/// 启动一个连接会话
///
/// 返回前连接已登记到传输层
pub fn spawn_session(context: SessionContext, connected: Connected) -> JoinHandle<()> {
    let Connected {
        connection,
        mut inbound,
    } = connected;

    context.transport.add_connection(connection.clone());
    let dispatcher = MessageDispatcher::new(connection.clone(), &context);

    tokio::spawn(async move {
        debug!("会话开始: {} ({})", connection.id(), connection.remote_addr());
        while let Some(message) = inbound.next().await {
            dispatcher.dispatch(message);
        }

        connection.close();
        context.registrar.session_closed(&connection);
        context.transport.remove_connection(&connection);
        debug!("会话结束: {} ({})", connection.id(), connection.remote_addr());
    })
}
