//! 単価カタログの取得
//!
//! 照合中は読み取り専用。`CachedCatalogStore` は一定時間内の再取得を省く。

use crate::error::{BoqError, Result};
use async_trait::async_trait;
use boq_match_common::catalog::validate_entries;
use boq_match_common::{CatalogEntry, CatalogIndex};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// キャッシュの既定有効期間
pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(5 * 60);

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_entries(&self) -> Result<Vec<CatalogEntry>>;

    /// 索引を構築して返す
    async fn load_index(&self) -> Result<CatalogIndex> {
        Ok(CatalogIndex::new(self.list_entries().await?))
    }
}

/// JSON配列ファイルのカタログ
#[derive(Debug, Clone)]
pub struct JsonCatalogStore {
    path: PathBuf,
}

impl JsonCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogStore for JsonCatalogStore {
    async fn list_entries(&self) -> Result<Vec<CatalogEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Err(BoqError::FileNotFound(self.path.display().to_string()));
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&content)
            .map_err(|e| BoqError::InvalidCatalog(format!("{}: {}", self.path.display(), e)))?;
        validate_entries(&entries)?;
        debug!(path = %self.path.display(), entries = entries.len(), "catalog loaded");
        Ok(entries)
    }
}

/// メモリ上のカタログ
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogStore {
    entries: Vec<CatalogEntry>,
}

impl MemoryCatalogStore {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn list_entries(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.entries.clone())
    }
}

/// 有効期間付きキャッシュ
pub struct CachedCatalogStore {
    inner: Arc<dyn CatalogStore>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, Vec<CatalogEntry>)>>,
}

impl CachedCatalogStore {
    pub fn new(inner: Arc<dyn CatalogStore>) -> Self {
        Self::with_ttl(inner, DEFAULT_CATALOG_TTL)
    }

    pub fn with_ttl(inner: Arc<dyn CatalogStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// 次回は必ず再取得させる
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[async_trait]
impl CatalogStore for CachedCatalogStore {
    async fn list_entries(&self) -> Result<Vec<CatalogEntry>> {
        let mut cached = self.cached.lock().await;
        if let Some((fetched, entries)) = cached.as_ref() {
            if fetched.elapsed() < self.ttl {
                return Ok(entries.clone());
            }
        }
        let entries = self.inner.list_entries().await?;
        *cached = Some((Instant::now(), entries.clone()));
        Ok(entries)
    }
}
