// Persistent LRU cache for completed translations.
//
// Keys combine an xxh3 content identity with the language pair, so the
// same page translated into two languages occupies two entries. Writes
// mark the cache dirty; a background task persists dirty state to JSON
// on a fixed interval, debouncing bursts of stores.

use crate::core::errors::{CacheError, CacheResult};
use crate::utils::usage::UsageTracker;
use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

const CACHE_FILE: &str = "translations.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub original_text: String,
    pub translated_text: String,
    pub model: String,
    pub confidence: f32,
    #[serde(default)]
    pub usage_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
}

/// Stable identity for source content, applied before queueing so cache
/// hits bypass the scheduler entirely.
pub fn content_identity(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

/// Cache key: content identity plus the language pair.
pub fn cache_key(identity: u64, source_lang: &str, target_lang: &str) -> String {
    format!("{identity:016x}:{source_lang}:{target_lang}")
}

pub struct TranslationCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: RwLock<LruCache<String, CacheEntry>>,
    cache_path: PathBuf,
    dirty: AtomicBool,
    usage: Option<UsageTracker>,
}

impl Clone for TranslationCache {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl TranslationCache {
    /// Load (or create) the cache and spawn the persistence task.
    pub async fn new(
        cache_dir: &str,
        max_entries: usize,
        save_interval: Duration,
        usage: Option<UsageTracker>,
    ) -> CacheResult<Self> {
        let dir = PathBuf::from(cache_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(CacheError::DirectoryCreationFailed)?;
        let cache_path = dir.join(CACHE_FILE);

        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        let mut entries = LruCache::new(capacity);

        if cache_path.exists() {
            let raw = tokio::fs::read_to_string(&cache_path)
                .await
                .map_err(|e| CacheError::LoadFailed {
                    path: cache_path.display().to_string(),
                    source: e,
                })?;
            let stored: HashMap<String, CacheEntry> = serde_json::from_str(&raw)?;
            let loaded = stored.len();
            for (key, entry) in stored {
                entries.put(key, entry);
            }
            info!(entries = loaded, path = %cache_path.display(), "translation cache loaded");
        }

        let cache = Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(entries),
                cache_path,
                dirty: AtomicBool::new(false),
                usage,
            }),
        };
        cache.spawn_persistence_task(save_interval);
        Ok(cache)
    }

    fn spawn_persistence_task(&self, save_interval: Duration) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(save_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if inner.dirty.swap(false, Ordering::AcqRel) {
                    if let Err(e) = Self::persist(&inner).await {
                        warn!(error = %e, "cache persistence failed");
                        inner.dirty.store(true, Ordering::Release);
                    }
                }
            }
        });
    }

    /// Look up a translation, bumping its usage count and recency on hit.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.inner.entries.write();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.usage_count += 1;
                self.inner.dirty.store(true, Ordering::Release);
                if let Some(usage) = &self.inner.usage {
                    usage.record_cache_hit();
                }
                debug!(key, count = entry.usage_count, "cache hit");
                Some(entry.clone())
            }
            None => {
                if let Some(usage) = &self.inner.usage {
                    usage.record_cache_miss();
                }
                None
            }
        }
    }

    /// Store a translation. Usage counts merge additively when the key is
    /// already present, so re-translations keep eviction pressure history.
    pub fn store(&self, key: String, mut entry: CacheEntry) {
        let mut entries = self.inner.entries.write();
        if let Some(existing) = entries.peek(&key) {
            entry.usage_count += existing.usage_count;
        }
        entries.put(key, entry);
        self.inner.dirty.store(true, Ordering::Release);
    }

    /// Force a save regardless of the dirty flag.
    pub async fn save(&self) -> CacheResult<()> {
        self.inner.dirty.store(false, Ordering::Release);
        Self::persist(&self.inner).await
    }

    async fn persist(inner: &CacheInner) -> CacheResult<()> {
        let snapshot: HashMap<String, CacheEntry> = {
            let entries = inner.entries.read();
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        let json = serde_json::to_string(&snapshot)?;
        tokio::fs::write(&inner.cache_path, json)
            .await
            .map_err(|e| CacheError::SaveFailed {
                path: inner.cache_path.display().to_string(),
                source: e,
            })?;
        debug!(entries = snapshot.len(), "cache persisted");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.inner.entries.read();
        CacheStats {
            entries: entries.len(),
            max_entries: entries.cap().get(),
        }
    }

    pub fn clear(&self) {
        self.inner.entries.write().clear();
        self.inner.dirty.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str) -> CacheEntry {
        CacheEntry {
            original_text: "こんにちは".to_string(),
            translated_text: text.to_string(),
            model: "gemini-2.5-flash".to_string(),
            confidence: 0.9,
            usage_count: 0,
        }
    }

    #[test]
    fn test_key_includes_language_pair() {
        let identity = content_identity("こんにちは".as_bytes());
        let ja_en = cache_key(identity, "ja", "en");
        let ja_fr = cache_key(identity, "ja", "fr");
        assert_ne!(ja_en, ja_fr);
        assert!(ja_en.ends_with(":ja:en"));
    }

    #[tokio::test]
    async fn test_lookup_bumps_usage_count() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::new(
            dir.path().to_str().unwrap(),
            16,
            Duration::from_secs(60),
            None,
        )
        .await
        .unwrap();

        cache.store("k1".to_string(), entry("Hello"));
        assert_eq!(cache.lookup("k1").unwrap().usage_count, 1);
        assert_eq!(cache.lookup("k1").unwrap().usage_count, 2);
        assert!(cache.lookup("missing").is_none());
    }

    #[tokio::test]
    async fn test_store_merges_usage_counts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::new(
            dir.path().to_str().unwrap(),
            16,
            Duration::from_secs(60),
            None,
        )
        .await
        .unwrap();

        cache.store("k1".to_string(), entry("Hello"));
        cache.lookup("k1");
        cache.lookup("k1");
        cache.store("k1".to_string(), entry("Hello again"));

        let merged = cache.lookup("k1").unwrap();
        assert_eq!(merged.translated_text, "Hello again");
        assert_eq!(merged.usage_count, 3);
    }

    #[tokio::test]
    async fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        {
            let cache = TranslationCache::new(path, 16, Duration::from_secs(60), None)
                .await
                .unwrap();
            cache.store("k1".to_string(), entry("Hello"));
            cache.save().await.unwrap();
        }

        let reloaded = TranslationCache::new(path, 16, Duration::from_secs(60), None)
            .await
            .unwrap();
        let got = reloaded.lookup("k1").unwrap();
        assert_eq!(got.translated_text, "Hello");
        assert_eq!(reloaded.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_hit_and_miss_recorded_in_usage() {
        let dir = tempfile::tempdir().unwrap();
        let usage = UsageTracker::new();
        let cache = TranslationCache::new(
            dir.path().to_str().unwrap(),
            16,
            Duration::from_secs(60),
            Some(usage.clone()),
        )
        .await
        .unwrap();

        cache.store("k1".to_string(), entry("Hello"));
        cache.lookup("k1");
        cache.lookup("nope");

        let snapshot = usage.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::new(
            dir.path().to_str().unwrap(),
            2,
            Duration::from_secs(60),
            None,
        )
        .await
        .unwrap();

        cache.store("a".to_string(), entry("1"));
        cache.store("b".to_string(), entry("2"));
        cache.lookup("a"); // refresh recency
        cache.store("c".to_string(), entry("3"));

        assert!(cache.lookup("a").is_some());
        assert!(cache.lookup("b").is_none());
        assert!(cache.lookup("c").is_some());
    }
}
