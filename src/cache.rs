//! Translation cache: one current entry per (text, source, target) key.
//!
//! Keys compare byte-for-byte after whitespace normalization; there is no
//! case folding and no fuzzy matching, so a hit is always reproducible.
//! Entries are superseded in place (same key, new text/confidence) and never
//! removed.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Model-version label used for entries written by a moderated correction.
pub const COMMUNITY_VERSION: &str = "community";

static WHITESPACE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Multiplicative confidence decay, kept within [0, 1].
pub fn decay(confidence: f64, factor: f64) -> f64 {
    (confidence * factor).clamp(0.0, 1.0)
}

/// Trim and collapse every internal whitespace run to a single space.
pub fn normalize_text(text: &str) -> String {
    let regex = WHITESPACE_REGEX.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));
    regex.replace_all(text.trim(), " ").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    pub source_text: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl CacheKey {
    /// Build a key; the text is normalized here so callers cannot forget.
    pub fn new(text: &str, source_lang: &str, target_lang: &str) -> Self {
        Self {
            source_text: normalize_text(text),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub target_text: String,
    pub confidence_score: f64,
    pub model_version: String,
    /// Number of resolutions served by this key; never decreases
    pub usage_count: u64,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Holds the per-key in-flight lock while a miss is being resolved. Dropping
/// it releases the key and forgets the lock once nobody else waits on it.
pub struct KeyGuard<'a> {
    cache: &'a TranslationCache,
    key: CacheKey,
    lock: Arc<Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .cache
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Map + owned guard + our clone; anything above means a waiter.
        if Arc::strong_count(&self.lock) <= 3 {
            in_flight.remove(&self.key);
        }
    }
}

#[derive(Default)]
pub struct TranslationCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    in_flight: StdMutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Serialize work on one key. Concurrent callers for the same key queue
    /// here; different keys never contend.
    pub async fn lock_key(&self, key: &CacheKey) -> KeyGuard<'_> {
        let lock = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        KeyGuard {
            cache: self,
            key: key.clone(),
            lock,
            _guard: guard,
        }
    }

    /// Count one more use of an existing entry and return it.
    pub async fn record_hit(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(key)?;
        entry.usage_count += 1;
        Some(entry.clone())
    }

    /// Store a model result for a key, counting it as one use. An existing
    /// entry keeps its usage history and verification is reset.
    pub async fn store_inference(
        &self,
        key: CacheKey,
        target_text: String,
        confidence_score: f64,
        model_version: &str,
    ) -> CacheEntry {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.clone()).or_insert_with(|| CacheEntry {
            key,
            target_text: String::new(),
            confidence_score: 0.0,
            model_version: String::new(),
            usage_count: 0,
            is_verified: false,
            created_at: now,
            updated_at: now,
        });
        entry.target_text = target_text;
        entry.confidence_score = confidence_score.clamp(0.0, 1.0);
        entry.model_version = model_version.to_string();
        entry.is_verified = false;
        entry.usage_count += 1;
        entry.updated_at = now;
        entry.clone()
    }

    /// Multiply the confidence of an entry by `factor`, floored at zero.
    pub async fn decay_confidence(&self, key: &CacheKey, factor: f64) -> Result<CacheEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| PipelineError::not_found("cache entry", describe(key)))?;
        entry.confidence_score = decay(entry.confidence_score, factor);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Supersede (or create) the entry for `key` with a moderated correction.
    pub async fn apply_correction(&self, key: CacheKey, corrected_text: &str) -> CacheEntry {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.clone()).or_insert_with(|| CacheEntry {
            key,
            target_text: String::new(),
            confidence_score: 0.0,
            model_version: String::new(),
            usage_count: 0,
            is_verified: false,
            created_at: now,
            updated_at: now,
        });
        entry.target_text = normalize_text(corrected_text);
        entry.confidence_score = 1.0;
        entry.model_version = COMMUNITY_VERSION.to_string();
        entry.is_verified = true;
        entry.updated_at = now;
        entry.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn describe(key: &CacheKey) -> String {
    format!(
        "{}->{} '{}'",
        key.source_lang, key.target_lang, key.source_text
    )
}
