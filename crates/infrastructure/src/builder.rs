use std::path::PathBuf;
use std::sync::Arc;

use application::{ChatRepository, FileStorage};
use thiserror::Error;

use crate::{file_storage::LocalFileStorage, memory::InMemoryChatRepository, seed::SeedData};

#[derive(Debug, Clone)]
pub struct InfrastructureConfig {
    pub files_base_url: String,
    pub seed_file: Option<PathBuf>,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            files_base_url: "http://127.0.0.1:8080".to_string(),
            seed_file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("failed to read seed file {path}: {source}")]
    SeedRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid seed file {path}: {source}")]
    SeedParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone)]
pub struct Infrastructure {
    pub repository: Arc<InMemoryChatRepository>,
    pub files: Arc<LocalFileStorage>,
}

impl Infrastructure {
    pub async fn build(config: InfrastructureConfig) -> Result<Self, InfrastructureError> {
        let repository = Arc::new(InMemoryChatRepository::default());

        if let Some(path) = config.seed_file {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| InfrastructureError::SeedRead {
                    path: path.clone(),
                    source,
                })?;
            let seed = SeedData::from_json(&raw)
                .map_err(|source| InfrastructureError::SeedParse {
                    path: path.clone(),
                    source,
                })?;
            tracing::info!(
                path = %path.display(),
                conversations = seed.conversations.len(),
                files = seed.files.len(),
                "loaded seed data"
            );
            seed.apply(&repository).await;
        }

        let files = Arc::new(LocalFileStorage::new(config.files_base_url));
        Ok(Self { repository, files })
    }

    pub fn repository_trait(&self) -> Arc<dyn ChatRepository> {
        self.repository.clone()
    }

    pub fn files_trait(&self) -> Arc<dyn FileStorage> {
        self.files.clone()
    }
}
