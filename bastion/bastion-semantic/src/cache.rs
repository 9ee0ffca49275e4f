//! Fallback cache of the last successful retrieval per caller scope.

use bastion_core::{CallerScope, Document};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Cache key: the caller's scope plus the normalized active-file set.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FallbackCacheKey {
    department: String,
    workspace_id: Option<String>,
    active_files: Vec<String>,
}

impl FallbackCacheKey {
    pub fn new(scope: &CallerScope, active_files: &[String]) -> Self {
        let mut files: Vec<String> = active_files
            .iter()
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        files.sort();
        files.dedup();

        Self {
            department: scope.department.clone(),
            workspace_id: scope.workspace_id.clone(),
            active_files: files,
        }
    }
}

/// Documents served when every retrieval strategy failed.
///
/// Entries are replaced wholesale on each successful retrieval, never merged.
pub struct FallbackCache {
    cache: Cache<FallbackCacheKey, Arc<Vec<Document>>>,
}

impl FallbackCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &FallbackCacheKey) -> Option<Arc<Vec<Document>>> {
        self.cache.get(key).await
    }

    pub async fn replace(&self, key: FallbackCacheKey, documents: Vec<Document>) {
        self.cache.insert(key, Arc::new(documents)).await;
    }

    pub async fn invalidate(&self, key: &FallbackCacheKey) {
        self.cache.invalidate(key).await;
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalizes_files() {
        let scope = CallerScope::new("FINANCE").with_workspace("ws");
        let a = FallbackCacheKey::new(&scope, &["Q4.txt".into(), "plan.PDF".into()]);
        let b = FallbackCacheKey::new(&scope, &[" plan.pdf".into(), "q4.TXT".into(), "Q4.txt".into()]);
        assert_eq!(a, b);

        let other = FallbackCacheKey::new(&CallerScope::new("MEDICAL").with_workspace("ws"), &[]);
        assert_ne!(FallbackCacheKey::new(&scope, &[]), other);
    }

    #[tokio::test]
    async fn test_replace_is_wholesale() {
        let cache = FallbackCache::new(100, Duration::from_secs(60));
        let key = FallbackCacheKey::new(&CallerScope::new("FINANCE"), &[]);

        cache
            .replace(key.clone(), vec![Document::new("a", "x"), Document::new("b", "y")])
            .await;
        cache.replace(key.clone(), vec![Document::new("c", "z")]).await;

        let cached = cache.get(&key).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, "c");

        cache.invalidate(&key).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = FallbackCache::new(100, Duration::from_secs(60));
        let key = FallbackCacheKey::new(&CallerScope::new("FINANCE"), &[]);
        cache.replace(key.clone(), vec![Document::new("a", "x")]).await;

        cache.clear().await;
        assert!(cache.get(&key).await.is_none());
    }
}
