//! 单个设备连接
//!
//! 连接在生命周期内绑定唯一的 (用户, 会话)，持有一个有界的出站缓冲。
//! 写入方只做非阻塞入队；关闭缓冲是通知写任务退出的唯一信号。

use std::sync::{Arc, Mutex, PoisonError};

use domain::{ConnectionId, ConversationId, UserId};
use thiserror::Error;
use tokio::sync::mpsc;

/// 序列化后的帧，广播时在多个连接间共享同一份数据
pub type SerializedFrame = Arc<str>;

/// 出站缓冲的消费端，由连接的写任务独占
pub type OutboundReceiver = mpsc::Receiver<SerializedFrame>;

/// 非阻塞入队失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    /// 缓冲已满（慢消费者）
    #[error("outbound buffer full")]
    Full,
    /// 缓冲已关闭
    #[error("outbound buffer closed")]
    Closed,
}

pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    conversation_id: ConversationId,
    // 唯一的发送端；置为 None 即关闭缓冲
    outbound: Mutex<Option<mpsc::Sender<SerializedFrame>>>,
}

impl Connection {
    /// 创建连接及其出站缓冲，`capacity` 至少为 1
    pub fn new(
        user_id: UserId,
        conversation_id: ConversationId,
        capacity: usize,
    ) -> (Arc<Self>, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id: ConnectionId::generate(),
            user_id,
            conversation_id,
            outbound: Mutex::new(Some(tx)),
        });
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// 非阻塞入队
    pub fn try_push(&self, frame: SerializedFrame) -> Result<(), PushError> {
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(PushError::Closed)?;
        sender.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// 关闭出站缓冲；返回本次调用是否真正执行了关闭
    ///
    /// 已入队的帧仍会被写任务取完，之后写任务收到 `None` 退出。
    pub fn close(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}
