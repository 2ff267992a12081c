//! Translation resolution: cache first, model on a miss.

use crate::analytics::{AnalyticsEvent, AnalyticsLog, Outcome};
use crate::cache::{CacheEntry, CacheKey, TranslationCache};
use crate::error::{PipelineError, Result};
use crate::languages::LanguageRegistry;
use crate::model::{ModelError, ModelRegistry, Scope};
use crate::retry::{with_retry_if, RetryConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl TranslationRequest {
    pub fn new(text: &str, source_lang: &str, target_lang: &str) -> Self {
        Self {
            text: text.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationResult {
    pub source_text: String,
    pub target_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub confidence_score: f64,
    pub model_version: String,
    pub usage_count: u64,
    pub is_verified: bool,
    pub cache_hit: bool,
}

impl TranslationResult {
    fn from_entry(entry: CacheEntry, cache_hit: bool) -> Self {
        Self {
            source_text: entry.key.source_text,
            target_text: entry.target_text,
            source_lang: entry.key.source_lang,
            target_lang: entry.key.target_lang,
            confidence_score: entry.confidence_score,
            model_version: entry.model_version,
            usage_count: entry.usage_count,
            is_verified: entry.is_verified,
            cache_hit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    /// One outcome per request, in request order
    pub outcomes: Vec<Result<TranslationResult>>,
    pub total_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Resolver {
    languages: Arc<LanguageRegistry>,
    cache: Arc<TranslationCache>,
    models: Arc<ModelRegistry>,
    analytics: AnalyticsLog,
    retry: RetryConfig,
}

impl Resolver {
    pub fn new(
        languages: Arc<LanguageRegistry>,
        cache: Arc<TranslationCache>,
        models: Arc<ModelRegistry>,
        analytics: AnalyticsLog,
    ) -> Self {
        Self {
            languages,
            cache,
            models,
            analytics,
            retry: RetryConfig::inference(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve one translation. Every call, successful or not, leaves exactly
    /// one analytics event behind.
    pub async fn resolve(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<TranslationResult> {
        let started = Instant::now();
        let resolved = self.resolve_uncounted(text, source_lang, target_lang).await;

        let event = match &resolved {
            Ok(result) => {
                let outcome = if result.cache_hit {
                    Outcome::Hit
                } else {
                    Outcome::Miss
                };
                AnalyticsEvent::new(source_lang, target_lang, outcome, started.elapsed())
                    .with_result(result.confidence_score, &result.model_version)
            }
            Err(e) => AnalyticsEvent::new(
                source_lang,
                target_lang,
                Outcome::Failed(e.kind()),
                started.elapsed(),
            ),
        };
        self.analytics.record(event);

        match &resolved {
            Ok(result) => debug!(
                "Resolved {}->{} '{}' (hit: {}, confidence {:.2}, {})",
                source_lang,
                target_lang,
                result.source_text,
                result.cache_hit,
                result.confidence_score,
                result.model_version
            ),
            Err(e) => debug!("Failed to resolve {}->{}: {}", source_lang, target_lang, e),
        }
        resolved
    }

    /// Resolve each request in order. A failing item is reported in place
    /// and never stops the rest of the batch.
    pub async fn resolve_batch(&self, requests: &[TranslationRequest]) -> BatchResult {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(
                self.resolve(&request.text, &request.source_lang, &request.target_lang)
                    .await,
            );
        }

        let succeeded = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        BatchResult {
            total_processed: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
        }
    }

    async fn resolve_uncounted(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<TranslationResult> {
        self.languages.require_pair(source_lang, target_lang).await?;
        let key = CacheKey::new(text, source_lang, target_lang);
        if key.source_text.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        if let Some(entry) = self.cache.get(&key).await {
            if !self.is_stale(&entry).await {
                return self.serve_hit(&key).await;
            }
        }

        // Single flight per key: whoever waited here finds the winner's entry
        let _guard = self.cache.lock_key(&key).await;
        let current = self.cache.get(&key).await;

        let active = match self.models.active_for_pair(source_lang, target_lang).await {
            Ok(active) => active,
            // A stale entry beats no answer at all
            Err(_) if current.is_some() => return self.serve_hit(&key).await,
            Err(e) => return Err(e),
        };
        if let Some(entry) = &current {
            if entry.is_verified || entry.model_version == active.version.id {
                return self.serve_hit(&key).await;
            }
        }

        let operation = format!("Inference {}->{} with {}", source_lang, target_lang, active.version.id);
        let generation = with_retry_if(
            &self.retry,
            &operation,
            || {
                self.analytics.record_inference();
                active.infer(&key.source_text, source_lang, target_lang)
            },
            ModelError::is_transient,
        )
        .await
        .map_err(|e| {
            PipelineError::model_unavailable(Scope::pair(source_lang, target_lang), e.to_string())
        })?;

        let entry = self
            .cache
            .store_inference(key, generation.text, generation.confidence, &active.version.id)
            .await;
        Ok(TranslationResult::from_entry(entry, false))
    }

    /// An unverified entry produced by something other than the version now
    /// serving its pair should be re-inferred.
    async fn is_stale(&self, entry: &CacheEntry) -> bool {
        if entry.is_verified {
            return false;
        }
        match self
            .models
            .active_for_pair(&entry.key.source_lang, &entry.key.target_lang)
            .await
        {
            Ok(active) => active.version.id != entry.model_version,
            Err(_) => false,
        }
    }

    async fn serve_hit(&self, key: &CacheKey) -> Result<TranslationResult> {
        self.cache
            .record_hit(key)
            .await
            .map(|entry| TranslationResult::from_entry(entry, true))
            .ok_or_else(|| PipelineError::not_found("cache entry", &key.source_text))
    }
}
