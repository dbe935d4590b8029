//! 统一配置中心
//!
//! 加载顺序：内置默认值 -> `APP_CONFIG_FILE` 指定的文件（toml/yaml/json）
//! -> `APP_` 前缀的环境变量（`__` 表示嵌套，例如 `APP_HUB__OUTBOUND_BUFFER=512`）。

use std::path::PathBuf;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub hub: HubConfig,
    pub jwt: JwtConfig,
    #[validate(nested)]
    pub files: FilesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 连接注册表配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HubConfig {
    /// 每个连接出站缓冲的容量
    #[validate(range(min = 1))]
    pub outbound_buffer: usize,
}

/// JWT配置
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FilesConfig {
    /// 文件 URL 前缀，解析结果为 `{base_url}/files/{path}`
    #[validate(url)]
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 启动时载入的会话/文件数据（JSON）
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

impl Default for AppConfig {
    /// 默认不带 JWT 密钥，必须由文件或环境变量提供
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
                cors_origins: vec!["*".into()],
            },
            hub: HubConfig {
                outbound_buffer: 256,
            },
            jwt: JwtConfig {
                secret: String::new(),
            },
            files: FilesConfig {
                base_url: "http://127.0.0.1:8080".into(),
            },
            storage: StorageConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(Env::prefixed("APP_").split("__"));

        let cfg: AppConfig = fig.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self)?;

        // 至少256位
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
}
