//! Result cache / 结果缓存
//!
//! Two namespaces with independent TTLs sit in front of the search pipeline:
//! full search results (short TTL) and suggestion/count payloads (longer
//! TTL). Keys are the sorted serialization of all normalized query
//! parameters. Reads within TTL short-circuit the pipeline; writes are
//! fire-and-forget from the caller's side and any cache failure degrades to
//! a miss, never to a request failure.
//! 读命中短路整条管线；写入由调用方分离执行；任何缓存故障都按未命中处理

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Cache namespace selector / 缓存命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    /// Full search results, short TTL / 搜索结果
    Results,
    /// Suggestion and count payloads, longer TTL / 建议与计数
    Suggest,
}

/// A cache hit annotated with its age / 带年龄标注的命中
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: Value,
    pub age_secs: i64,
}

/// Cache service seam. The engine only needs get/put of JSON blobs; an
/// external cache service can be swapped in behind this trait.
/// 缓存服务接口，可替换为外部缓存实现
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, ns: CacheNamespace, key: &str) -> Option<CacheHit>;
    async fn put(&self, ns: CacheNamespace, key: String, payload: Value);
}

struct CacheEntry {
    payload: Value,
    stored_at: i64,
}

/// In-process cache implementation / 进程内缓存实现
pub struct MemoryCache {
    results: RwLock<HashMap<String, CacheEntry>>,
    suggest: RwLock<HashMap<String, CacheEntry>>,
    results_ttl_secs: i64,
    suggest_ttl_secs: i64,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(results_ttl_secs: i64, suggest_ttl_secs: i64, max_entries: usize) -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
            suggest: RwLock::new(HashMap::new()),
            results_ttl_secs,
            suggest_ttl_secs,
            max_entries: max_entries.max(1),
        }
    }

    fn shard(&self, ns: CacheNamespace) -> (&RwLock<HashMap<String, CacheEntry>>, i64) {
        match ns {
            CacheNamespace::Results => (&self.results, self.results_ttl_secs),
            CacheNamespace::Suggest => (&self.suggest, self.suggest_ttl_secs),
        }
    }

    /// Lookup against an explicit clock, the TTL seam exercised by tests
    /// 以显式时钟查询，便于测试TTL边界
    fn lookup_at(&self, ns: CacheNamespace, key: &str, now: i64) -> Option<CacheHit> {
        let (shard, ttl) = self.shard(ns);
        {
            let map = shard.read();
            if let Some(entry) = map.get(key) {
                let age = now - entry.stored_at;
                if age < ttl {
                    return Some(CacheHit {
                        payload: entry.payload.clone(),
                        age_secs: age.max(0),
                    });
                }
            } else {
                return None;
            }
        }
        // Expired: drop the entry so the shard does not accumulate stale rows
        // 过期条目顺手清除
        shard.write().remove(key);
        None
    }

    fn store_at(&self, ns: CacheNamespace, key: String, payload: Value, now: i64) {
        let (shard, ttl) = self.shard(ns);
        let mut map = shard.write();
        if map.len() >= self.max_entries {
            map.retain(|_, e| now - e.stored_at < ttl);
            if map.len() >= self.max_entries {
                tracing::debug!("cache namespace full, clearing {} entries", map.len());
                map.clear();
            }
        }
        map.insert(key, CacheEntry { payload, stored_at: now });
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, ns: CacheNamespace, key: &str) -> Option<CacheHit> {
        self.lookup_at(ns, key, Utc::now().timestamp())
    }

    async fn put(&self, ns: CacheNamespace, key: String, payload: Value) {
        self.store_at(ns, key, payload, Utc::now().timestamp());
    }
}

/// Build the canonical cache key: parameters sorted by name, `k=v` joined
/// with `&`. Present-but-empty and absent filters serialize the same way, so
/// equivalent requests share an entry.
/// 参数按名称排序后序列化，等价请求共享缓存条目
pub fn cache_key(params: &[(&str, String)]) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    pairs.sort();
    pairs.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = MemoryCache::new(300, 1800, 64);
        cache.store_at(CacheNamespace::Results, "k".into(), json!({"n": 1}), 1000);

        let hit = cache.lookup_at(CacheNamespace::Results, "k", 1250).unwrap();
        assert_eq!(hit.age_secs, 250);
        assert_eq!(hit.payload, json!({"n": 1}));

        assert!(cache.lookup_at(CacheNamespace::Results, "k", 1310).is_none());
        // Expired entry was dropped / 过期条目已被清除
        assert!(cache.lookup_at(CacheNamespace::Results, "k", 1000).is_none());
    }

    #[test]
    fn namespaces_have_independent_ttls() {
        let cache = MemoryCache::new(300, 1800, 64);
        cache.store_at(CacheNamespace::Results, "k".into(), json!(1), 0);
        cache.store_at(CacheNamespace::Suggest, "k".into(), json!(2), 0);

        assert!(cache.lookup_at(CacheNamespace::Results, "k", 500).is_none());
        let hit = cache.lookup_at(CacheNamespace::Suggest, "k", 500).unwrap();
        assert_eq!(hit.payload, json!(2));
    }

    #[test]
    fn full_namespace_sweeps_expired_entries() {
        let cache = MemoryCache::new(300, 1800, 2);
        cache.store_at(CacheNamespace::Results, "a".into(), json!(1), 0);
        cache.store_at(CacheNamespace::Results, "b".into(), json!(2), 200);
        // "a" is expired at t=400, the sweep makes room without dropping "b"
        cache.store_at(CacheNamespace::Results, "c".into(), json!(3), 400);

        assert!(cache.lookup_at(CacheNamespace::Results, "b", 399).is_some());
        assert!(cache.lookup_at(CacheNamespace::Results, "c", 401).is_some());
    }

    #[test]
    fn key_is_order_insensitive_and_skips_empty() {
        let a = cache_key(&[
            ("q", "hello".to_string()),
            ("language", "en".to_string()),
            ("content_ids", String::new()),
        ]);
        let b = cache_key(&[
            ("language", "en".to_string()),
            ("q", "hello".to_string()),
        ]);
        assert_eq!(a, b);
        assert_eq!(a, "language=en&q=hello");
    }
}
