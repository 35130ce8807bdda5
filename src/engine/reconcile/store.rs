//! Cache backends.
//!
//! A store applies a [`CachePatch`] to a copy of the row and publishes the
//! copy only once the whole patch (and, for the file store, the write to
//! disk) has succeeded. Readers see the old row or the new one, never a mix.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::prelude::*;
use crate::types::{AppliedFields, CachePatch, CacheRecord, PoolId};
use crate::Error;

/// Keyed pool record store. Written only by the reconciler.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, pool_id: PoolId) -> Result<Option<CacheRecord>>;

    /// Apply `patch` all-or-nothing, creating the row if needed.
    async fn upsert(&self, patch: &CachePatch) -> Result<(AppliedFields, CacheRecord)>;

    async fn list(&self) -> Result<Vec<CacheRecord>>;
}

impl std::fmt::Debug for dyn CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CacheStore")
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    rows: RwLock<HashMap<PoolId, CacheRecord>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, pool_id: PoolId) -> Result<Option<CacheRecord>> {
        Ok(self.rows.read().await.get(&pool_id).cloned())
    }

    async fn upsert(&self, patch: &CachePatch) -> Result<(AppliedFields, CacheRecord)> {
        let mut rows = self.rows.write().await;
        let mut row = rows
            .get(&patch.pool_id)
            .cloned()
            .unwrap_or_else(|| CacheRecord::empty(patch.pool_id));
        let applied = patch.apply(&mut row);
        rows.insert(patch.pool_id, row.clone());
        Ok((applied, row))
    }

    async fn list(&self) -> Result<Vec<CacheRecord>> {
        let mut rows: Vec<CacheRecord> = self.rows.read().await.values().cloned().collect();
        rows.sort_by_key(|r| r.pool_id);
        Ok(rows)
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct CacheDocument {
    version: u32,
    pools: Vec<CacheRecord>,
}

const DOCUMENT_VERSION: u32 = 1;

/// Single JSON document on disk, rewritten atomically on every upsert.
#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    rows: RwLock<BTreeMap<PoolId, CacheRecord>>,
}

impl JsonFileCache {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rows = if path.exists() {
            let json = fs::read_to_string(&path)
                .map_err(|e| Error::cache(format!("read {}: {e}", path.display())))?;
            let doc: CacheDocument = serde_json::from_str(&json)
                .map_err(|e| Error::cache(format!("parse {}: {e}", path.display())))?;
            if doc.version != DOCUMENT_VERSION {
                return Err(Error::cache(format!(
                    "{} has version {}, expected {DOCUMENT_VERSION}",
                    path.display(),
                    doc.version
                )));
            }
            doc.pools.into_iter().map(|r| (r.pool_id, r)).collect()
        } else {
            BTreeMap::new()
        };
        info!(path = %path.display(), pools = rows.len(), "Opened pool cache");
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write to `<path>.tmp`, then rename over `path`.
    fn persist(&self, rows: &BTreeMap<PoolId, CacheRecord>) -> Result<()> {
        let doc = CacheDocument {
            version: DOCUMENT_VERSION,
            pools: rows.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::cache(format!("serialize cache: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| Error::cache(format!("create {}: {e}", parent.display())))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|e| Error::cache(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| Error::cache(format!("rename {}: {e}", tmp.display())))?;
        debug!(path = %self.path.display(), pools = rows.len(), "Persisted pool cache");
        Ok(())
    }
}

#[async_trait]
impl CacheStore for JsonFileCache {
    async fn get(&self, pool_id: PoolId) -> Result<Option<CacheRecord>> {
        Ok(self.rows.read().await.get(&pool_id).cloned())
    }

    async fn upsert(&self, patch: &CachePatch) -> Result<(AppliedFields, CacheRecord)> {
        let mut rows = self.rows.write().await;
        let mut row = rows
            .get(&patch.pool_id)
            .cloned()
            .unwrap_or_else(|| CacheRecord::empty(patch.pool_id));
        let applied = patch.apply(&mut row);

        // No await between here and the swap: a cancelled caller either
        // published everything or nothing.
        let mut next = rows.clone();
        next.insert(patch.pool_id, row.clone());
        self.persist(&next)?;
        *rows = next;
        Ok((applied, row))
    }

    async fn list(&self) -> Result<Vec<CacheRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}
