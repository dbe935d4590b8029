use std::sync::Arc;

use application::{Connection, OutboundReceiver, ProtocolError};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConversationId, OutboundFrame, UserId};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;

use crate::error::ApiError;
use crate::state::AppState;

/// 单个已准入的 WebSocket 连接
///
/// 写任务按先进先出把出站缓冲写到套接字；读任务把每个入站帧交给分发器。
/// 读任务结束时中止写任务；写任务结束时只通知读任务在帧之间停止，
/// 正在分发的帧会处理完。两种情况最后都会驱逐连接。
pub struct WebSocketConnection {
    state: AppState,
    connection: Arc<Connection>,
    outbound: OutboundReceiver,
}

impl WebSocketConnection {
    /// 创建连接并经由注册循环准入；返回时连接已在索引中
    pub async fn open(
        state: AppState,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<Self, ApiError> {
        let (connection, outbound) =
            Connection::new(user_id, conversation_id, state.outbound_buffer);
        state.registrar.register(connection.clone()).await?;

        Ok(Self {
            state,
            connection,
            outbound,
        })
    }

    pub async fn run(self, socket: WebSocket) {
        let Self {
            state,
            connection,
            outbound,
        } = self;
        let (sink, stream) = socket.split();

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut write_task = tokio::spawn(write_pump(sink, outbound));
        let mut read_task = tokio::spawn(read_pump(
            stream,
            state.clone(),
            connection.clone(),
            stop_rx,
        ));

        tokio::select! {
            _ = &mut write_task => {
                let _ = stop_tx.send(true);
                if let Err(err) = read_task.await {
                    tracing::warn!(error = %err, "websocket reader task failed");
                }
            }
            _ = &mut read_task => write_task.abort(),
        }

        state.registrar.unregister(connection.clone());
        tracing::debug!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            conversation_id = %connection.conversation_id(),
            "websocket pumps stopped"
        );
    }
}

/// 缓冲关闭（所有发送端被丢弃）或写失败时结束
async fn write_pump(mut sink: SplitSink<WebSocket, WsMessage>, mut outbound: OutboundReceiver) {
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = sink.send(WsMessage::Text(frame.as_ref().into())).await {
            tracing::debug!(error = %err, "websocket write failed");
            break;
        }
    }
    // 尽量让对端看到正常关闭
    let _ = sink.close().await;
}

/// 只在等待下一帧时响应停止信号，不会打断进行中的分发
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    state: AppState,
    connection: Arc<Connection>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.changed() => break,
            next = stream.next() => next,
        };
        let Some(message) = next else { break };
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(
                    error = %err,
                    connection_id = %connection.id(),
                    "websocket read failed"
                );
                break;
            }
        };

        match message {
            WsMessage::Text(text) => state.handler.handle(&connection, text.as_str()).await,
            WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => state.handler.handle(&connection, text).await,
                Err(_) => {
                    let reply = OutboundFrame::error(ProtocolError::InvalidFormat.to_string());
                    state.hub().send_to_connection(&connection, &reply).await;
                }
            },
            WsMessage::Close(_) => break,
            // ping/pong 由传输层处理
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
        }
    }
}
