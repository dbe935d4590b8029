use application::FileStorage;

/// 本地文件服务：只负责把存储路径拼成可访问的 URL
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    base_url: String,
}

impl LocalFileStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl FileStorage for LocalFileStorage {
    fn url(&self, storage_path: &str) -> String {
        format!("{}/files/{}", self.base_url, storage_path)
    }
}
