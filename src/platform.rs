//! The assembled pipeline.
//!
//! [`Platform`] wires every component around one shared set of stores and is
//! the surface an outer layer (HTTP handlers, a CLI, a job runner) talks to.

use crate::analytics::{AnalyticsLog, MetricsReport};
use crate::cache::TranslationCache;
use crate::config::{BackendKind, Config};
use crate::corpus::{CorpusStore, ImportSummary, VerificationStatus};
use crate::detection::{Detection, LanguageDetector};
use crate::error::Result;
use crate::feedback::{
    Contribution, Decision, FeedbackLoop, FeedbackOutcome, ModerationOutcome, NewContribution,
    NewFeedback,
};
use crate::languages::{CulturalContext, CulturalNote, LanguageRegistry};
use crate::model::{
    DictionaryBackend, ModelRegistry, ModelVersion, RemoteBackend, Scope, TranslationModelBackend,
};
use crate::resolver::{BatchResult, Resolver, TranslationRequest, TranslationResult};
use crate::retry::RetryConfig;
use crate::training::{TrainingPipeline, TrainingRun};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Platform {
    config: Config,
    languages: Arc<LanguageRegistry>,
    cache: Arc<TranslationCache>,
    corpus: Arc<CorpusStore>,
    models: Arc<ModelRegistry>,
    analytics: AnalyticsLog,
    resolver: Resolver,
    feedback: FeedbackLoop,
    training: Arc<TrainingPipeline>,
    detector: LanguageDetector,
    cultural: CulturalContext,
}

/// Build the backend named by the configuration.
pub fn backend_from_config(config: &Config) -> Arc<dyn TranslationModelBackend> {
    match &config.backend {
        BackendKind::Dictionary => Arc::new(DictionaryBackend),
        BackendKind::Remote { base_url } => Arc::new(
            RemoteBackend::new(base_url)
                .with_timeout(Duration::from_secs(config.model_request_timeout_secs)),
        ),
    }
}

impl Platform {
    /// Assemble the pipeline with the configured backend. The language
    /// registry starts with the default language set.
    pub async fn from_config(config: Config) -> Self {
        let backend = backend_from_config(&config);
        Self::new(config, backend).await
    }

    /// Assemble the pipeline around an explicit backend. Must be called
    /// inside a Tokio runtime.
    pub async fn new(config: Config, backend: Arc<dyn TranslationModelBackend>) -> Self {
        let languages = Arc::new(LanguageRegistry::with_defaults().await);
        let cache = Arc::new(TranslationCache::new());
        let corpus = Arc::new(CorpusStore::new(Arc::clone(&languages)));
        let models = Arc::new(ModelRegistry::new());
        let analytics = AnalyticsLog::spawn();

        let retry = RetryConfig {
            max_attempts: config.inference_max_attempts,
            ..RetryConfig::inference()
        };
        let resolver = Resolver::new(
            Arc::clone(&languages),
            Arc::clone(&cache),
            Arc::clone(&models),
            analytics.clone(),
        )
        .with_retry(retry);
        let feedback = FeedbackLoop::new(
            Arc::clone(&languages),
            Arc::clone(&cache),
            Arc::clone(&corpus),
            config.confidence_decay,
        );
        let detector = LanguageDetector::new(Arc::clone(&languages), Arc::clone(&corpus));
        let cultural = CulturalContext::with_defaults(Arc::clone(&languages));
        let training = Arc::new(TrainingPipeline::new(
            Arc::clone(&languages),
            Arc::clone(&corpus),
            Arc::clone(&models),
            backend,
            config.training(),
        ));

        Self {
            config,
            languages,
            cache,
            corpus,
            models,
            analytics,
            resolver,
            feedback,
            training,
            detector,
            cultural,
        }
    }

    pub async fn resolve(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<TranslationResult> {
        self.resolver.resolve(text, source_lang, target_lang).await
    }

    pub async fn resolve_batch(&self, requests: &[TranslationRequest]) -> BatchResult {
        self.resolver.resolve_batch(requests).await
    }

    pub async fn detect_language(&self, text: &str) -> Result<Detection> {
        self.detector.detect_language(text).await
    }

    pub async fn cultural_context(&self, language: &str, phrase: &str) -> Result<Option<CulturalNote>> {
        self.cultural.lookup(language, phrase).await
    }

    pub async fn submit_feedback(&self, feedback: NewFeedback) -> Result<FeedbackOutcome> {
        self.feedback.submit_feedback(feedback).await
    }

    pub async fn contribute(&self, contribution: NewContribution) -> Result<Contribution> {
        self.feedback.contribute(contribution).await
    }

    pub async fn moderate(
        &self,
        contribution_id: u64,
        decision: Decision,
        notes: Option<String>,
    ) -> Result<ModerationOutcome> {
        self.feedback.moderate(contribution_id, decision, notes).await
    }

    /// Start a background training run and return its id.
    pub async fn start_training_run(&self, scope: Scope) -> Result<u64> {
        self.training.start_training_run(scope).await
    }

    /// Train a scope in the foreground.
    pub async fn train(&self, scope: Scope) -> Result<TrainingRun> {
        self.training.run(scope).await
    }

    pub async fn run_status(&self, run_id: u64) -> Result<TrainingRun> {
        self.training.run_status(run_id).await
    }

    /// Make a staged (or retired) version the one serving its scope.
    pub async fn promote(&self, version_id: &str) -> Result<ModelVersion> {
        self.models.promote(version_id).await
    }

    pub fn metrics(&self) -> MetricsReport {
        self.analytics.report()
    }

    /// Import every `*.json` file of a directory, in file-name order, as
    /// collected corpus records.
    pub async fn import_corpus_dir(&self, dir: &Path) -> anyhow::Result<ImportSummary> {
        let status = if self.config.seed_auto_approve {
            VerificationStatus::Approved
        } else {
            VerificationStatus::Pending
        };

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read corpus directory {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut total = ImportSummary::default();
        for file in &files {
            let summary = self.corpus.import_json(file, status).await?;
            total.imported += summary.imported;
            total.skipped += summary.skipped;
        }
        info!(
            "Seeded corpus from {} files in {} ({} records, {} skipped)",
            files.len(),
            dir.display(),
            total.imported,
            total.skipped
        );
        Ok(total)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn corpus(&self) -> &CorpusStore {
        &self.corpus
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn analytics(&self) -> &AnalyticsLog {
        &self.analytics
    }

    pub fn feedback(&self) -> &FeedbackLoop {
        &self.feedback
    }

    pub fn training(&self) -> &TrainingPipeline {
        &self.training
    }

    pub fn cultural(&self) -> &CulturalContext {
        &self.cultural
    }
}
