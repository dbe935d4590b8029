//! 启动数据
//!
//! 内存仓储没有会话管理接口，部署时通过 JSON 文件预置会话成员与已上传文件：
//!
//! ```json
//! {
//!   "conversations": [{ "id": "…", "members": ["…", "…"] }],
//!   "files": [{ "id": "…", "user_id": "…", "original_filename": "a.png",
//!               "mime_type": "image/png", "file_size": 10,
//!               "storage_path": "123_a.png", "created_at": "2024-05-01T08:00:00Z" }]
//! }
//! ```

use domain::{ConversationId, FileUpload, UserId};
use serde::Deserialize;

use crate::memory::InMemoryChatRepository;

#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub conversations: Vec<SeedConversation>,
    #[serde(default)]
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Deserialize)]
pub struct SeedConversation {
    pub id: ConversationId,
    #[serde(default)]
    pub members: Vec<UserId>,
}

impl SeedData {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub async fn apply(self, repository: &InMemoryChatRepository) {
        for conversation in self.conversations {
            repository
                .create_conversation(conversation.id, conversation.members)
                .await;
        }
        for file in self.files {
            repository.insert_file(file).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::ChatRepository;

    #[tokio::test]
    async fn test_apply_seed() {
        let conversation = ConversationId::generate();
        let member = UserId::generate();
        let raw = format!(r#"{{"conversations":[{{"id":"{conversation}","members":["{member}"]}}]}}"#);

        let repository = InMemoryChatRepository::default();
        SeedData::from_json(&raw).unwrap().apply(&repository).await;

        assert!(repository.is_member(conversation, member).await.unwrap());
    }

    #[test]
    fn test_rejects_malformed_ids() {
        let raw = r#"{"conversations":[{"id":"not-a-uuid"}]}"#;
        assert!(SeedData::from_json(raw).is_err());
    }
}
