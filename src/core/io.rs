use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Where generated media lands. Paths handed out by `write` are what the
/// story record stores and what `read` accepts back.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    /// Writes `content` under `file_name` and returns the stored path.
    async fn write(&self, file_name: &str, content: &[u8]) -> Result<String>;
    async fn exists(&self, path: &str) -> Result<bool>;
    fn root(&self) -> &Path;
}

pub struct NativeStorage {
    root: PathBuf,
}

impl NativeStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, file_name: &str, content: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(file_name);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path.to_string_lossy().to_string())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    fn root(&self) -> &Path {
        &self.root
    }
}
