//! 文件上传实体定义

use serde::{Deserialize, Serialize};

use crate::value_objects::{FileId, Timestamp, UserId};

/// 已存储文件的元数据（由外部文件服务写入）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    /// 文件ID
    pub id: FileId,
    /// 上传用户ID
    pub user_id: UserId,
    /// 原始文件名
    pub original_filename: String,
    /// MIME类型
    pub mime_type: String,
    /// 文件大小（字节）
    pub file_size: i64,
    /// 存储路径，交给文件服务解析为可访问的URL
    pub storage_path: String,
    /// 创建时间
    pub created_at: Timestamp,
}

impl FileUpload {
    /// 创建新的文件上传记录
    pub fn new(
        user_id: UserId,
        original_filename: impl Into<String>,
        mime_type: impl Into<String>,
        file_size: i64,
        storage_path: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: FileId::generate(),
            user_id,
            original_filename: original_filename.into(),
            mime_type: mime_type.into(),
            file_size,
            storage_path: storage_path.into(),
            created_at,
        }
    }
}
