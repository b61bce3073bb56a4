//! Generation Cache
//!
//! Engine runs are slow and deterministic for a given image and stock
//! state, so reports are memoised by image id and content digest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use super::GenerationReport;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    image_id: i64,
    digest: [u8; 32],
}

#[derive(Debug, Clone)]
struct CacheEntry {
    inserted_at: Instant,
    report: GenerationReport,
}

/// In-memory report cache with TTL expiry and a capacity bound.
pub struct GenerationCache {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
    ttl: Duration,
    capacity: usize,
}

impl GenerationCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            capacity,
        }
    }

    fn key(image_id: i64, image: &[u8]) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(image);
        CacheKey { image_id, digest: hasher.finalize().into() }
    }

    pub async fn get(&self, image_id: i64, image: &[u8]) -> Option<GenerationReport> {
        let key = Self::key(image_id, image);
        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => return Some(entry.report.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        debug!("Cached generation for image {} expired", image_id);
        self.entries.write().await.remove(&key);
        None
    }

    pub async fn insert(&self, image_id: i64, image: &[u8], report: GenerationReport) {
        if self.capacity == 0 {
            return;
        }
        let key = Self::key(image_id, image);
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);

        while entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(oldest) => {
                    entries.remove(&oldest);
                }
                None => break,
            }
        }
        entries.insert(key, CacheEntry { inserted_at: Instant::now(), report });
    }

    /// Drop every report for one image, e.g. after its stock context changed.
    pub async fn invalidate(&self, image_id: i64) {
        self.entries.write().await.retain(|key, _| key.image_id != image_id);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
