use std::collections::HashMap;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::request::RecommendationRequest;
use super::result::RecommendationResult;
use crate::Language;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecommendation {
    pub sequence: u64,
    pub request: RecommendationRequest,
    pub model: String,
    pub result: RecommendationResult,
}

/// Holds the single most recent result.
#[derive(Debug, Default)]
pub struct RecommendationCache {
    slot: RwLock<Option<CachedRecommendation>>,
}

impl RecommendationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins regardless of sequence.
    pub async fn store(&self, entry: CachedRecommendation) {
        *self.slot.write().await = Some(entry);
    }

    /// Stores only when `entry` is at least as new as the cached one. Returns whether it was stored.
    pub async fn store_if_newer(&self, entry: CachedRecommendation) -> bool {
        let mut slot = self.slot.write().await;
        if let Some(current) = slot.as_ref() {
            if current.sequence > entry.sequence {
                return false;
            }
        }
        *slot = Some(entry);
        true
    }

    pub async fn latest(&self) -> Option<CachedRecommendation> {
        self.slot.read().await.clone()
    }

    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TranslationKey {
    sequence: u64,
    language: Language,
    digest: String,
}

/// Translated renderings of cached results.
#[derive(Debug, Default)]
pub struct TranslationCache {
    entries: RwLock<HashMap<TranslationKey, RecommendationResult>>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, source: &CachedRecommendation, language: Language) -> Option<RecommendationResult> {
        let key = translation_key(source, language)?;
        self.entries.read().await.get(&key).cloned()
    }

    pub async fn insert(
        &self,
        source: &CachedRecommendation,
        language: Language,
        translated: RecommendationResult,
    ) {
        let Some(key) = translation_key(source, language) else {
            return;
        };
        let mut entries = self.entries.write().await;
        // Translations of older results are no longer reachable.
        entries.retain(|existing, _| existing.sequence >= source.sequence);
        entries.insert(key, translated);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn translation_key(source: &CachedRecommendation, language: Language) -> Option<TranslationKey> {
    let payload = serde_json::to_vec(&source.result).ok()?;
    Some(TranslationKey {
        sequence: source.sequence,
        language,
        digest: format!("{:x}", Sha256::digest(&payload)),
    })
}
