use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hf_types::HfResult;
use parking_lot::RwLock;
use tracing::debug;

/// Identity of a materialized dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetKey {
    pub size: u64,
    pub positive_ratio: f64,
}

impl DatasetKey {
    pub fn new(size: u64, positive_ratio: f64) -> Self {
        Self {
            size,
            positive_ratio,
        }
    }

    /// Bitwise identity; two ratios are the same key only if they are the
    /// same float.
    fn cache_key(&self) -> (u64, u64) {
        (self.size, self.positive_ratio.to_bits())
    }
}

/// Builds a dataset (train/val splits plus descriptor) for a key.
///
/// Implementations must be idempotent for a given key.
#[async_trait]
pub trait DatasetMaterializer: Send + Sync {
    /// Writes the dataset under `out_dir` and returns the location the
    /// trainer should be pointed at.
    async fn materialize(&self, key: DatasetKey, out_dir: &Path) -> HfResult<PathBuf>;
}

#[async_trait]
impl<T: DatasetMaterializer + ?Sized> DatasetMaterializer for Box<T> {
    async fn materialize(&self, key: DatasetKey, out_dir: &Path) -> HfResult<PathBuf> {
        (**self).materialize(key, out_dir).await
    }
}

/// Process-lifetime memo of materialized datasets. No eviction, no
/// invalidation: a key always maps to its first artifact.
#[derive(Debug)]
pub struct DatasetCache<M> {
    materializer: M,
    entries: RwLock<HashMap<(u64, u64), PathBuf>>,
    stats: RwLock<CacheStats>,
}

impl<M: DatasetMaterializer> DatasetCache<M> {
    pub fn new(materializer: M) -> Self {
        Self {
            materializer,
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Returns the cached artifact for `key`, materializing into `out_dir`
    /// on first use. Failures are not cached.
    pub async fn get_or_materialize(&self, key: DatasetKey, out_dir: &Path) -> HfResult<PathBuf> {
        let cached = self.entries.read().get(&key.cache_key()).cloned();
        if let Some(path) = cached {
            self.stats.write().hits += 1;
            debug!(
                "Dataset cache hit for size {} ratio {}: {}",
                key.size,
                key.positive_ratio,
                path.display()
            );
            return Ok(path);
        }

        self.stats.write().misses += 1;
        debug!(
            "Dataset cache miss for size {} ratio {}, materializing into {}",
            key.size,
            key.positive_ratio,
            out_dir.display()
        );
        let path = self.materializer.materialize(key, out_dir).await?;

        self.entries.write().insert(key.cache_key(), path.clone());
        self.stats.write().stores += 1;
        Ok(path)
    }

    pub fn get_stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn materializer(&self) -> &M {
        &self.materializer
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
