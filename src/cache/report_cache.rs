//! Report Cache
//!
//! Bounded cache of synthesized hunt reports keyed by content hash
//! (topic + timestamp). Two eviction paths: a periodic TTL sweep drops
//! entries past their time-to-live, and inserts over capacity evict the
//! least-recently-*accessed* entry (not the oldest created). Reads and
//! re-writes both refresh recency.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::domain::Synthesis;
use crate::persistence::Persist;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedReport {
    pub id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub report: Synthesis,
}

pub struct ReportCache {
    cfg: CacheConfig,
    entries: RwLock<HashMap<String, CachedReport>>,
    hits: AtomicU64,
    misses: AtomicU64,
    dirty: AtomicBool,
}

impl ReportCache {
    pub fn new(cfg: CacheConfig) -> Self {
        Self {
            cfg,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// Insert (or overwrite) a report. Returns the report id. Re-writing
    /// an existing id refreshes recency and never grows the cache.
    pub async fn put(&self, report: Synthesis) -> String {
        let id = report.report_id.clone();
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get_mut(&id) {
            existing.report = report;
            existing.last_accessed = now;
        } else {
            if entries.len() >= self.cfg.capacity {
                if let Some(lru_id) = entries
                    .values()
                    .min_by_key(|e| e.last_accessed)
                    .map(|e| e.id.clone())
                {
                    entries.remove(&lru_id);
                    debug!(evicted = %lru_id, "report cache at capacity, evicted LRU entry");
                }
            }
            entries.insert(
                id.clone(),
                CachedReport {
                    id: id.clone(),
                    topic: report.topic.clone(),
                    created_at: now,
                    last_accessed: now,
                    report,
                },
            );
        }
        drop(entries);

        self.dirty.store(true, Ordering::SeqCst);
        id
    }

    /// Look up a report, refreshing its recency on hit.
    pub async fn get(&self, id: &str) -> Option<Synthesis> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) => {
                entry.last_accessed = Utc::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.dirty.store(true, Ordering::SeqCst);
                Some(entry.report.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Drop entries older than the TTL regardless of access. Returns the
    /// number evicted.
    pub async fn evict_expired(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.cfg.ttl_secs as i64);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.created_at > cutoff);
        let evicted = before - entries.len();
        if evicted > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            debug!(evicted, "TTL sweep evicted expired reports");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn hit_counts(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Spawn the periodic TTL sweep; runs until shutdown fires.
    pub fn spawn_sweep(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = std::time::Duration::from_secs(cache.cfg.sweep_interval_secs);
        info!(
            interval_secs = cache.cfg.sweep_interval_secs,
            ttl_secs = cache.cfg.ttl_secs,
            "report cache sweep started"
        );
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = timer.tick() => {
                        cache.evict_expired().await;
                    }
                }
            }
            info!("report cache sweep stopped");
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CacheDocument {
    entries: Vec<CachedReport>,
}

#[async_trait]
impl Persist for ReportCache {
    fn document(&self) -> &'static str {
        "reports"
    }

    async fn to_document(&self) -> Value {
        let doc = CacheDocument {
            entries: self.entries.read().await.values().cloned().collect(),
        };
        serde_json::to_value(doc).unwrap_or(Value::Null)
    }

    async fn restore(&self, doc: &Value) -> std::result::Result<(), String> {
        let doc: CacheDocument = serde_json::from_value(doc.clone()).map_err(|e| e.to_string())?;
        let mut entries = self.entries.write().await;
        *entries = doc
            .entries
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{report_id, Direction, Recommendation, StakingSummary};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn report(topic: &str, seq: i64) -> Synthesis {
        let timestamp = Utc::now() + ChronoDuration::milliseconds(seq);
        Synthesis {
            hunt_id: Uuid::new_v4(),
            topic: topic.to_string(),
            timestamp,
            confidence: 50.0,
            recommendation: Recommendation::Hold,
            consensus: Direction::Neutral,
            signals: vec![],
            staking: StakingSummary {
                consensus: Direction::Neutral,
                total_staked: Decimal::ZERO,
                total_returned: Decimal::ZERO,
                stakes: vec![],
            },
            reputation: BTreeMap::new(),
            pricing: BTreeMap::new(),
            competitions: vec![],
            warnings: vec![],
            degraded: false,
            report_id: report_id(topic, timestamp),
        }
    }

    fn cache(capacity: usize) -> ReportCache {
        ReportCache::new(CacheConfig {
            capacity,
            ttl_secs: 3600,
            sweep_interval_secs: 60,
        })
    }

    #[tokio::test]
    async fn overflow_evicts_least_recently_accessed_not_oldest_created() {
        let cache = cache(10);
        let mut ids = Vec::new();
        for i in 0..10 {
            ids.push(cache.put(report("topic", i)).await);
        }

        // Touch the oldest entry so the second-oldest becomes LRU
        assert!(cache.get(&ids[0]).await.is_some());

        cache.put(report("topic", 999)).await;
        assert_eq!(cache.len().await, 10);
        assert!(cache.get(&ids[0]).await.is_some());
        assert!(cache.get(&ids[1]).await.is_none());
    }

    #[tokio::test]
    async fn rewriting_the_same_id_does_not_grow_the_cache() {
        let cache = cache(10);
        let mut synthesis = report("topic", 1);
        synthesis.confidence = 10.0;
        let id = cache.put(synthesis.clone()).await;

        synthesis.confidence = 90.0;
        let id2 = cache.put(synthesis).await;

        assert_eq!(id, id2);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&id).await.unwrap().confidence, 90.0);
    }

    #[tokio::test]
    async fn ttl_sweep_evicts_by_creation_time() {
        let cache = ReportCache::new(CacheConfig {
            capacity: 10,
            ttl_secs: 0,
            sweep_interval_secs: 60,
        });
        let id = cache.put(report("topic", 1)).await;

        // Accessing does not rescue an expired entry
        assert!(cache.get(&id).await.is_some());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(cache.evict_expired().await, 1);
        assert!(cache.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn hit_and_miss_counters_track_lookups() {
        let cache = cache(10);
        let id = cache.put(report("topic", 1)).await;
        cache.get(&id).await;
        cache.get("missing").await;

        assert_eq!(cache.hit_counts(), (1, 1));
    }
}
