//! 连接注册表（Hub）
//!
//! 进程内唯一的共享可变结构：`会话 -> 用户 -> 连接集合` 三级索引。
//! 空的用户层、会话层在移除时立即剪枝。
//!
//! 锁的使用：准入/驱逐持有写锁；广播和查询只持有读锁遍历索引，
//! 对慢消费者先在读锁下关闭其缓冲，再在释放读锁后升级为写锁把它移出索引。
//! 任何时候都不会在持锁期间等待某个客户端的写操作。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{ConnectionId, ConversationId, OutboundFrame, UserId};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::connection::{Connection, SerializedFrame};
use crate::error::ApplicationError;

type UserBucket = HashMap<ConnectionId, Arc<Connection>>;
type Room = HashMap<UserId, UserBucket>;

/// 一次扇出的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// 成功入队的连接数
    pub delivered: usize,
    /// 因缓冲已满（或已关闭）被驱逐的连接数
    pub evicted: usize,
}

#[derive(Clone, Default)]
pub struct Hub {
    rooms: Arc<RwLock<HashMap<ConversationId, Room>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 准入连接，按需创建中间层
    pub async fn admit(&self, connection: Arc<Connection>) {
        let conversation_id = connection.conversation_id();
        let user_id = connection.user_id();
        let connection_id = connection.id();

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(conversation_id)
            .or_default()
            .entry(user_id)
            .or_default()
            .insert(connection_id, connection);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            conversation_id = %conversation_id,
            "connection admitted"
        );
    }

    /// 驱逐连接：关闭其出站缓冲并剪枝空层
    ///
    /// 可重复调用，连接已不在索引中时返回 `false`。
    pub async fn evict(&self, connection: &Connection) -> bool {
        connection.close();

        let conversation_id = connection.conversation_id();
        let user_id = connection.user_id();

        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&conversation_id) else {
            return false;
        };

        let removed = match room.get_mut(&user_id) {
            Some(bucket) => {
                let removed = bucket.remove(&connection.id()).is_some();
                if bucket.is_empty() {
                    room.remove(&user_id);
                }
                removed
            }
            None => false,
        };
        if room.is_empty() {
            rooms.remove(&conversation_id);
        }
        drop(rooms);

        if removed {
            tracing::info!(
                connection_id = %connection.id(),
                user_id = %user_id,
                conversation_id = %conversation_id,
                "connection evicted"
            );
        }
        removed
    }

    /// 广播到会话内除 `excluded_user_id` 以外所有用户的所有设备
    pub async fn broadcast_to_conversation(
        &self,
        conversation_id: ConversationId,
        excluded_user_id: UserId,
        frame: &OutboundFrame,
    ) -> FanOut {
        let Some(payload) = serialize(frame) else {
            return FanOut::default();
        };

        let mut dead = Vec::new();
        let mut delivered = 0;
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&conversation_id) {
                for (user_id, bucket) in room {
                    if *user_id == excluded_user_id {
                        continue;
                    }
                    delivered += push_to_bucket(bucket, &payload, &mut dead);
                }
            }
        }

        FanOut {
            delivered,
            evicted: self.evict_dead(dead).await,
        }
    }

    /// 发送给某个用户在该会话中的全部设备
    pub async fn send_to_user(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        frame: &OutboundFrame,
    ) -> FanOut {
        let Some(payload) = serialize(frame) else {
            return FanOut::default();
        };

        let mut dead = Vec::new();
        let delivered = {
            let rooms = self.rooms.read().await;
            rooms
                .get(&conversation_id)
                .and_then(|room| room.get(&user_id))
                .map_or(0, |bucket| push_to_bucket(bucket, &payload, &mut dead))
        };

        FanOut {
            delivered,
            evicted: self.evict_dead(dead).await,
        }
    }

    /// 只回复给指定连接（确认与错误），同样遵循满即驱逐的策略
    pub async fn send_to_connection(
        &self,
        connection: &Arc<Connection>,
        frame: &OutboundFrame,
    ) -> FanOut {
        let Some(payload) = serialize(frame) else {
            return FanOut::default();
        };

        match connection.try_push(payload) {
            Ok(()) => FanOut {
                delivered: 1,
                evicted: 0,
            },
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    connection_id = %connection.id(),
                    "dropping unresponsive connection"
                );
                self.evict(connection).await;
                FanOut {
                    delivered: 0,
                    evicted: 1,
                }
            }
        }
    }

    /// 用户在该会话中是否至少有一个活跃连接
    pub async fn is_online(&self, conversation_id: ConversationId, user_id: UserId) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(&conversation_id)
            .and_then(|room| room.get(&user_id))
            .is_some_and(|bucket| !bucket.is_empty())
    }

    pub async fn online_users(&self, conversation_id: ConversationId) -> Vec<UserId> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&conversation_id)
            .map(|room| room.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self, conversation_id: ConversationId) -> usize {
        let rooms = self.rooms.read().await;
        rooms
            .get(&conversation_id)
            .map_or(0, |room| room.values().map(HashMap::len).sum())
    }

    pub async fn conversation_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// 启动串行的准入/驱逐循环
    ///
    /// 所有经由 [`Registrar`] 的结构性修改都在这一个任务里按到达顺序执行。
    pub fn spawn_registrar(&self) -> (Registrar, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.clone().run_registrar(rx));
        (Registrar { tx }, handle)
    }

    async fn run_registrar(self, mut commands: mpsc::UnboundedReceiver<RegistryCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                RegistryCommand::Register { connection, done } => {
                    self.admit(connection).await;
                    let _ = done.send(());
                }
                RegistryCommand::Unregister(connection) => {
                    self.evict(&connection).await;
                }
            }
        }
        tracing::debug!("registrar loop stopped");
    }

    async fn evict_dead(&self, dead: Vec<Arc<Connection>>) -> usize {
        let mut evicted = 0;
        for connection in dead {
            if self.evict(&connection).await {
                evicted += 1;
            }
        }
        evicted
    }
}

/// 对桶内每个连接做非阻塞入队；失败的连接立即关闭并记入 `dead`
fn push_to_bucket(
    bucket: &UserBucket,
    payload: &SerializedFrame,
    dead: &mut Vec<Arc<Connection>>,
) -> usize {
    let mut delivered = 0;
    for connection in bucket.values() {
        match connection.try_push(payload.clone()) {
            Ok(()) => delivered += 1,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    connection_id = %connection.id(),
                    user_id = %connection.user_id(),
                    "dropping unresponsive connection"
                );
                connection.close();
                dead.push(connection.clone());
            }
        }
    }
    delivered
}

fn serialize(frame: &OutboundFrame) -> Option<SerializedFrame> {
    match frame.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(err) => {
            tracing::error!(error = %err, kind = %frame.kind, "failed to serialize outbound frame");
            None
        }
    }
}

enum RegistryCommand {
    Register {
        connection: Arc<Connection>,
        done: oneshot::Sender<()>,
    },
    Unregister(Arc<Connection>),
}

/// 串行准入/驱逐循环的句柄
#[derive(Clone)]
pub struct Registrar {
    tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl Registrar {
    /// 提交准入，连接进入索引后返回
    pub async fn register(&self, connection: Arc<Connection>) -> Result<(), ApplicationError> {
        let (done, admitted) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Register { connection, done })
            .map_err(|_| ApplicationError::RegistryClosed)?;
        admitted.await.map_err(|_| ApplicationError::RegistryClosed)
    }

    /// 提交驱逐；缓冲立即关闭，索引移除由循环异步完成
    pub fn unregister(&self, connection: Arc<Connection>) {
        connection.close();
        if self
            .tx
            .send(RegistryCommand::Unregister(connection))
            .is_err()
        {
            tracing::warn!("registrar stopped before connection could be unregistered");
        }
    }
}
