use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 消息送达回执
/// 每个 (消息, 接收者) 一条，重复写入只刷新时间
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MessageDelivery {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub delivered_at: Timestamp,
    pub read_at: Option<Timestamp>, // 已读时间
}

impl MessageDelivery {
    /// 创建新的送达记录
    pub fn delivered(message_id: MessageId, user_id: UserId, delivered_at: Timestamp) -> Self {
        Self {
            message_id,
            user_id,
            delivered_at,
            read_at: None,
        }
    }

    /// 标记消息已读；已读隐含已送达
    pub fn mark_read(&mut self, read_at: Timestamp) {
        if self.read_at.is_none() {
            self.read_at = Some(read_at);
        }
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// 用户在某个会话中的已读游标
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReadCursor {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub last_read_at: Timestamp,
}

impl ReadCursor {
    pub fn new(conversation_id: ConversationId, user_id: UserId, last_read_at: Timestamp) -> Self {
        Self {
            conversation_id,
            user_id,
            last_read_at,
        }
    }

    /// 游标只前进不后退
    pub fn advance(&mut self, at: Timestamp) {
        if at > self.last_read_at {
            self.last_read_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_message_delivery_lifecycle() {
        let now = Utc::now();
        let mut delivery = MessageDelivery::delivered(MessageId::generate(), UserId::generate(), now);
        assert!(!delivery.is_read());

        let read_time = now + Duration::milliseconds(100);
        delivery.mark_read(read_time);
        assert!(delivery.is_read());

        // 第二次标记不覆盖首次已读时间
        delivery.mark_read(read_time + Duration::seconds(1));
        assert_eq!(delivery.read_at, Some(read_time));
    }

    #[test]
    fn test_read_cursor_never_moves_backwards() {
        let now = Utc::now();
        let mut cursor = ReadCursor::new(ConversationId::generate(), UserId::generate(), now);
        cursor.advance(now - Duration::seconds(10));
        assert_eq!(cursor.last_read_at, now);
        cursor.advance(now + Duration::seconds(10));
        assert_eq!(cursor.last_read_at, now + Duration::seconds(10));
    }
}
