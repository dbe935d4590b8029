/// 文件服务契约：把存储路径解析为客户端可访问的 URL
#[cfg_attr(test, mockall::automock)]
pub trait FileStorage: Send + Sync {
    fn url(&self, storage_path: &str) -> String;
}
