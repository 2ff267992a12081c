//! Staged training pipeline.
//!
//! A run walks `pending → assembling → tokenizing → training → evaluating`
//! and ends `ready` or `failed`. Each run works on an immutable corpus
//! snapshot, so it can be reproduced later from the snapshot id. A failure at
//! any stage marks the run and its model version failed and touches nothing
//! else: the corpus and every other version stay as they were.
//!
//! Ending `ready` means the version is staged, not serving. Promotion is a
//! separate decision made through the model registry.

use crate::cache::normalize_text;
use crate::corpus::{CorpusRecord, CorpusStore, Snapshot};
use crate::error::{PipelineError, Result};
use crate::languages::LanguageRegistry;
use crate::model::{
    EvaluationMetrics, ModelRegistry, Scope, TrainingExample, TranslationModel,
    TranslationModelBackend,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Pending,
    Assembling,
    Tokenizing,
    Training,
    Evaluating,
    Ready,
    Failed,
}

impl RunStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Ready | RunStage::Failed)
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Pending => "pending",
            RunStage::Assembling => "assembling",
            RunStage::Tokenizing => "tokenizing",
            RunStage::Training => "training",
            RunStage::Evaluating => "evaluating",
            RunStage::Ready => "ready",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub epochs: u32,
    /// Share of examples held out for evaluation
    pub eval_ratio: f64,
    /// Token sequences are truncated to this length
    pub max_tokens: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            eval_ratio: 0.2,
            max_tokens: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    pub record_id: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunDiagnostics {
    pub skipped: Vec<SkippedRecord>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunFailure {
    pub stage: RunStage,
    pub cause: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingRun {
    pub id: u64,
    pub scope: Scope,
    pub state: RunStage,
    pub snapshot_id: Option<String>,
    pub version_id: Option<String>,
    pub evaluation: Option<EvaluationMetrics>,
    pub diagnostics: RunDiagnostics,
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrainingRun {
    fn new(id: u64, scope: Scope) -> Self {
        Self {
            id,
            scope,
            state: RunStage::Pending,
            snapshot_id: None,
            version_id: None,
            evaluation: None,
            diagnostics: RunDiagnostics::default(),
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// The staged version id of a ready run, or the failure as an error.
    pub fn outcome(&self) -> Result<&str> {
        if let Some(failure) = &self.failure {
            return Err(PipelineError::TrainingRunFailed {
                stage: failure.stage,
                cause: failure.cause.clone(),
            });
        }
        match (&self.state, &self.version_id) {
            (RunStage::Ready, Some(version_id)) => Ok(version_id),
            _ => Err(PipelineError::Conflict(format!(
                "training run {} is still {}",
                self.id, self.state
            ))),
        }
    }
}

/// Lower-cased word and punctuation tokens, at most `max_tokens` of them.
pub fn tokenize(text: &str, max_tokens: usize) -> Vec<String> {
    let regex = TOKEN_REGEX.get_or_init(|| Regex::new(r"\w+|[^\w\s]").expect("valid regex"));
    regex
        .find_iter(&text.to_lowercase())
        .take(max_tokens)
        .map(|token| token.as_str().to_string())
        .collect()
}

/// Harmonic mean of token precision and recall, counting repeated tokens.
pub fn token_f1(predicted: &[String], reference: &[String]) -> f64 {
    if predicted.is_empty() && reference.is_empty() {
        return 1.0;
    }
    if predicted.is_empty() || reference.is_empty() {
        return 0.0;
    }

    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for token in reference {
        *remaining.entry(token.as_str()).or_insert(0) += 1;
    }
    let mut overlap = 0usize;
    for token in predicted {
        if let Some(count) = remaining.get_mut(token.as_str()) {
            if *count > 0 {
                *count -= 1;
                overlap += 1;
            }
        }
    }
    if overlap == 0 {
        return 0.0;
    }

    let precision = overlap as f64 / predicted.len() as f64;
    let recall = overlap as f64 / reference.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Number of trailing examples held out for evaluation.
pub fn eval_split(total: usize, eval_ratio: f64) -> usize {
    if total < 2 {
        return 0;
    }
    let held_out = (total as f64 * eval_ratio.clamp(0.0, 1.0)).floor() as usize;
    held_out.clamp(1, total - 1)
}

fn to_example(record: &CorpusRecord, scope: &Scope, max_tokens: usize) -> std::result::Result<TrainingExample, String> {
    if !scope.covers(&record.source_lang, &record.target_lang) {
        return Err(format!(
            "pair {}->{} is outside scope {}",
            record.source_lang, record.target_lang, scope
        ));
    }
    let input = tokenize(&record.source_text, max_tokens);
    let label = tokenize(&record.target_text, max_tokens);
    if input.is_empty() || label.is_empty() {
        return Err("empty source or target after tokenization".to_string());
    }
    Ok(TrainingExample {
        record_id: record.id,
        source_lang: record.source_lang.clone(),
        target_lang: record.target_lang.clone(),
        source_text: record.source_text.clone(),
        target_text: record.target_text.clone(),
        input,
        label,
    })
}

/// Turn a snapshot into training examples, collecting skipped records.
pub fn prepare_examples(
    snapshot: &Snapshot,
    max_tokens: usize,
    diagnostics: &mut RunDiagnostics,
) -> Vec<TrainingExample> {
    let mut examples = Vec::with_capacity(snapshot.records.len());
    for record in &snapshot.records {
        match to_example(record, &snapshot.scope, max_tokens) {
            Ok(example) => examples.push(example),
            Err(reason) => diagnostics.skipped.push(SkippedRecord {
                record_id: record.id,
                reason,
            }),
        }
    }
    examples
}

async fn evaluate(
    artifact: &dyn TranslationModel,
    train_examples: usize,
    held_out: &[TrainingExample],
    max_tokens: usize,
) -> std::result::Result<EvaluationMetrics, String> {
    let mut exact = 0usize;
    let mut f1_sum = 0.0;
    let mut confidence_sum = 0.0;

    for example in held_out {
        let generation = artifact
            .generate(&example.source_text, &example.source_lang, &example.target_lang)
            .await
            .map_err(|e| format!("inference on record {} failed: {}", example.record_id, e))?;

        if normalize_text(&generation.text).to_lowercase()
            == normalize_text(&example.target_text).to_lowercase()
        {
            exact += 1;
        }
        f1_sum += token_f1(&tokenize(&generation.text, max_tokens), &example.label);
        confidence_sum += crate::model::clamp_confidence(generation.confidence);
    }

    let n = held_out.len() as f64;
    Ok(EvaluationMetrics {
        train_examples,
        eval_examples: held_out.len(),
        exact_match: exact as f64 / n,
        token_f1: f1_sum / n,
        mean_confidence: confidence_sum / n,
    })
}

pub struct TrainingPipeline {
    languages: Arc<LanguageRegistry>,
    corpus: Arc<CorpusStore>,
    models: Arc<ModelRegistry>,
    backend: Arc<dyn TranslationModelBackend>,
    config: TrainingConfig,
    runs: RwLock<HashMap<u64, TrainingRun>>,
    next_run_id: AtomicU64,
}

impl TrainingPipeline {
    pub fn new(
        languages: Arc<LanguageRegistry>,
        corpus: Arc<CorpusStore>,
        models: Arc<ModelRegistry>,
        backend: Arc<dyn TranslationModelBackend>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            languages,
            corpus,
            models,
            backend,
            config,
            runs: RwLock::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Queue a run in the background and return its id right away. Poll
    /// [`TrainingPipeline::run_status`] for progress.
    pub async fn start_training_run(self: &Arc<Self>, scope: Scope) -> Result<u64> {
        let id = self.open_run(&scope).await?;
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.execute(id, scope).await;
        });
        Ok(id)
    }

    /// Drive one run to completion and return its final record.
    pub async fn run(&self, scope: Scope) -> Result<TrainingRun> {
        let id = self.open_run(&scope).await?;
        Ok(self.execute(id, scope).await)
    }

    pub async fn run_status(&self, id: u64) -> Result<TrainingRun> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("training run", id))
    }

    /// All runs for a scope, oldest first.
    pub async fn runs_for(&self, scope: &Scope) -> Vec<TrainingRun> {
        let mut runs: Vec<TrainingRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| &run.scope == scope)
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.id);
        runs
    }

    async fn open_run(&self, scope: &Scope) -> Result<u64> {
        for code in scope.languages() {
            self.languages.require_active(code).await?;
        }
        if let Scope::Multilingual { languages, .. } = scope {
            if languages.len() < 2 {
                return Err(PipelineError::Validation(format!(
                    "multilingual scope {} needs at least two languages",
                    scope
                )));
            }
        }

        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        self.runs
            .write()
            .await
            .insert(id, TrainingRun::new(id, scope.clone()));
        info!("Training run {} queued for {}", id, scope);
        Ok(id)
    }

    async fn publish(&self, run: &TrainingRun) {
        self.runs.write().await.insert(run.id, run.clone());
    }

    async fn enter(&self, run: &mut TrainingRun, stage: RunStage) {
        run.state = stage;
        self.publish(run).await;
        info!("Training run {} entered {}", run.id, stage);
    }

    async fn fail(&self, mut run: TrainingRun, stage: RunStage, cause: String) -> TrainingRun {
        error!("Training run {} failed during {}: {}", run.id, stage, cause);
        if let Some(version_id) = &run.version_id {
            if let Err(e) = self.models.mark_failed(version_id, &cause).await {
                warn!("Could not mark version {} failed: {}", version_id, e);
            }
        }

        run.state = RunStage::Failed;
        run.failure = Some(RunFailure { stage, cause });
        run.finished_at = Some(Utc::now());
        self.publish(&run).await;
        run
    }

    async fn execute(&self, id: u64, scope: Scope) -> TrainingRun {
        let mut run = match self.runs.read().await.get(&id) {
            Some(run) => run.clone(),
            None => TrainingRun::new(id, scope.clone()),
        };

        // Assembling
        self.enter(&mut run, RunStage::Assembling).await;
        let snapshot = self.corpus.snapshot(&scope).await;
        let version = self
            .models
            .register_training(&scope, &snapshot.id, self.config.epochs)
            .await;
        run.snapshot_id = Some(snapshot.id.clone());
        run.version_id = Some(version.id.clone());
        if snapshot.is_empty() {
            return self
                .fail(run, RunStage::Assembling, "no approved records for scope".into())
                .await;
        }

        // Tokenizing
        self.enter(&mut run, RunStage::Tokenizing).await;
        let examples = prepare_examples(&snapshot, self.config.max_tokens, &mut run.diagnostics);
        if !run.diagnostics.skipped.is_empty() {
            warn!(
                "Training run {} skipped {} malformed records",
                id,
                run.diagnostics.skipped.len()
            );
        }
        let held_out_count = eval_split(examples.len(), self.config.eval_ratio);
        run.diagnostics.notes.push(format!(
            "{} examples from snapshot {} ({} held out)",
            examples.len(),
            snapshot.id,
            held_out_count
        ));
        if examples.is_empty() {
            return self
                .fail(run, RunStage::Tokenizing, "every record was skipped".into())
                .await;
        }

        // Training
        self.enter(&mut run, RunStage::Training).await;
        let split = examples.len() - held_out_count;
        let train: Vec<TrainingExample> = examples[..split].to_vec();
        let held_out = &examples[split..];

        let backend = Arc::clone(&self.backend);
        let fit_scope = scope.clone();
        let epochs = self.config.epochs;
        let fitted = tokio::spawn(async move { backend.fit(&fit_scope, &train, epochs).await }).await;
        let output = match fitted {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return self.fail(run, RunStage::Training, e.to_string()).await,
            Err(join_error) if join_error.is_panic() => {
                return self
                    .fail(run, RunStage::Training, "model backend panicked".into())
                    .await;
            }
            Err(join_error) => {
                return self
                    .fail(run, RunStage::Training, join_error.to_string())
                    .await;
            }
        };

        // Evaluating
        self.enter(&mut run, RunStage::Evaluating).await;
        if held_out.is_empty() {
            let cause = format!("evaluation set is empty ({} examples)", examples.len());
            return self.fail(run, RunStage::Evaluating, cause).await;
        }
        let artifact = Arc::clone(&output.artifact);
        let eval_set = held_out.to_vec();
        let max_tokens = self.config.max_tokens;
        let evaluated = tokio::spawn(async move {
            evaluate(artifact.as_ref(), split, &eval_set, max_tokens).await
        })
        .await;
        let metrics = match evaluated {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(cause)) => return self.fail(run, RunStage::Evaluating, cause).await,
            Err(join_error) if join_error.is_panic() => {
                return self
                    .fail(run, RunStage::Evaluating, "model artifact panicked".into())
                    .await;
            }
            Err(join_error) => {
                return self
                    .fail(run, RunStage::Evaluating, join_error.to_string())
                    .await;
            }
        };

        let staged = self
            .models
            .mark_staged(&version.id, output.artifact, metrics.clone(), output.metrics)
            .await;
        if let Err(e) = staged {
            return self.fail(run, RunStage::Evaluating, e.to_string()).await;
        }

        info!(
            "Training run {} ready: {} staged (exact match {:.2}, token F1 {:.2})",
            id, version.id, metrics.exact_match, metrics.token_f1
        );
        run.state = RunStage::Ready;
        run.evaluation = Some(metrics);
        run.finished_at = Some(Utc::now());
        self.publish(&run).await;
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{NewRecord, Provenance, VerificationStatus};
    use crate::error::ErrorKind;
    use crate::model::{DictionaryBackend, FitOutput, Generation, ModelError, VersionStatus};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct PanickingBackend;

    #[async_trait]
    impl TranslationModelBackend for PanickingBackend {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn fit(&self, _: &Scope, _: &[TrainingExample], _: u32) -> std::result::Result<FitOutput, ModelError> {
            panic!("out of memory");
        }
    }

    struct RejectingBackend;

    #[async_trait]
    impl TranslationModelBackend for RejectingBackend {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn fit(&self, _: &Scope, _: &[TrainingExample], _: u32) -> std::result::Result<FitOutput, ModelError> {
            Err(ModelError::Rejected("unsupported language pair".into()))
        }
    }

    struct PanickingModel;

    #[async_trait]
    impl TranslationModel for PanickingModel {
        async fn generate(&self, _: &str, _: &str, _: &str) -> std::result::Result<Generation, ModelError> {
            panic!("corrupt weights");
        }
    }

    /// Fits fine, but the artifact it hands back panics on first use.
    struct BrokenArtifactBackend;

    #[async_trait]
    impl TranslationModelBackend for BrokenArtifactBackend {
        fn name(&self) -> &str {
            "broken-artifact"
        }

        async fn fit(&self, _: &Scope, _: &[TrainingExample], _: u32) -> std::result::Result<FitOutput, ModelError> {
            Ok(FitOutput {
                artifact: Arc::new(PanickingModel),
                metrics: BTreeMap::new(),
            })
        }
    }

    struct Fixture {
        corpus: Arc<CorpusStore>,
        models: Arc<ModelRegistry>,
        pipeline: Arc<TrainingPipeline>,
    }

    async fn fixture(backend: Arc<dyn TranslationModelBackend>) -> Fixture {
        let languages = Arc::new(LanguageRegistry::with_defaults().await);
        let corpus = Arc::new(CorpusStore::new(Arc::clone(&languages)));
        let models = Arc::new(ModelRegistry::new());
        let pipeline = Arc::new(TrainingPipeline::new(
            languages,
            Arc::clone(&corpus),
            Arc::clone(&models),
            backend,
            TrainingConfig::default(),
        ));
        Fixture {
            corpus,
            models,
            pipeline,
        }
    }

    async fn add_approved(corpus: &CorpusStore, pairs: &[(&str, &str)]) {
        for (source, target) in pairs {
            corpus
                .append(NewRecord::new(
                    source,
                    target,
                    "en",
                    "sw",
                    Provenance::Collected,
                    VerificationStatus::Approved,
                ))
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_tokenize_splits_words_and_punctuation() {
        assert_eq!(
            tokenize("Habari, YAKO?", 128),
            vec!["habari", ",", "yako", "?"]
        );
        assert_eq!(tokenize("a b c d", 2), vec!["a", "b"]);
        assert!(tokenize("   ", 128).is_empty());
    }

    #[test]
    fn test_token_f1() {
        let tokens = |s: &str| tokenize(s, 128);
        assert_eq!(token_f1(&tokens("habari yako"), &tokens("habari yako")), 1.0);
        assert_eq!(token_f1(&tokens("asante"), &tokens("habari yako")), 0.0);
        // precision 1/1, recall 1/2
        let partial = token_f1(&tokens("habari"), &tokens("habari yako"));
        assert!((partial - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(token_f1(&[], &[]), 1.0);
    }

    #[test]
    fn test_eval_split() {
        assert_eq!(eval_split(0, 0.2), 0);
        assert_eq!(eval_split(1, 0.2), 0);
        assert_eq!(eval_split(2, 0.2), 1);
        assert_eq!(eval_split(10, 0.2), 2);
        assert_eq!(eval_split(10, 1.0), 9);
    }

    #[test]
    fn test_prepare_examples_skips_out_of_scope_records() {
        let record = |id: u64, target_lang: &str| CorpusRecord {
            id,
            source_text: "Hello".into(),
            target_text: "Hujambo".into(),
            source_lang: "en".into(),
            target_lang: target_lang.into(),
            domain: "general".into(),
            provenance: Provenance::Collected,
            verification_status: VerificationStatus::Approved,
            supersedes: None,
            origin: None,
            created_at: Utc::now(),
            moderated_at: None,
        };
        let snapshot = Snapshot {
            id: "fixture".into(),
            scope: Scope::pair("en", "sw"),
            records: vec![record(1, "sw"), record(2, "ki")],
            taken_at: Utc::now(),
        };

        let mut diagnostics = RunDiagnostics::default();
        let examples = prepare_examples(&snapshot, 128, &mut diagnostics);
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].input, vec!["hello"]);
        assert_eq!(diagnostics.skipped.len(), 1);
        assert_eq!(diagnostics.skipped[0].record_id, 2);
    }

    #[tokio::test]
    async fn test_run_without_approved_records_fails() {
        let f = fixture(Arc::new(DictionaryBackend)).await;
        let run = f.pipeline.run(Scope::pair("en", "sw")).await.unwrap();

        assert_eq!(run.state, RunStage::Failed);
        let failure = run.failure.clone().unwrap();
        assert_eq!(failure.stage, RunStage::Assembling);
        assert_eq!(run.outcome().unwrap_err().kind(), ErrorKind::TrainingRunFailed);

        let version = f.models.version(run.version_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(version.status, VersionStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_stages_version_with_metrics() {
        let f = fixture(Arc::new(DictionaryBackend)).await;
        add_approved(
            &f.corpus,
            &[
                ("Hello", "Hujambo"),
                ("Thank you", "Asante"),
                ("Good morning", "Habari za asubuhi"),
                ("Goodbye", "Kwaheri"),
                ("Hello", "Hujambo"),
            ],
        )
        .await;

        let run = f.pipeline.run(Scope::pair("en", "sw")).await.unwrap();
        assert_eq!(run.state, RunStage::Ready);
        assert!(run.failure.is_none());

        let metrics = run.evaluation.clone().unwrap();
        assert_eq!(metrics.train_examples, 4);
        assert_eq!(metrics.eval_examples, 1);
        // The held-out "Hello" was also in the training part
        assert_eq!(metrics.exact_match, 1.0);

        let version_id = run.outcome().unwrap();
        let version = f.models.version(version_id).await.unwrap();
        assert_eq!(version.status, VersionStatus::Staged);
        assert_eq!(version.corpus_snapshot_id, run.snapshot_id);
        assert_eq!(version.epochs, 3);

        // Staged is not serving
        assert!(f.models.get_active(&Scope::pair("en", "sw")).await.is_err());
    }

    #[tokio::test]
    async fn test_poor_metrics_still_reach_ready() {
        let f = fixture(Arc::new(DictionaryBackend)).await;
        add_approved(&f.corpus, &[("Hello", "Hujambo"), ("Goodbye", "Kwaheri")]).await;

        let run = f.pipeline.run(Scope::pair("en", "sw")).await.unwrap();
        assert_eq!(run.state, RunStage::Ready);
        assert_eq!(run.evaluation.unwrap().exact_match, 0.0);
    }

    #[tokio::test]
    async fn test_single_record_fails_at_evaluation() {
        let f = fixture(Arc::new(DictionaryBackend)).await;
        add_approved(&f.corpus, &[("Hello", "Hujambo")]).await;

        let run = f.pipeline.run(Scope::pair("en", "sw")).await.unwrap();
        assert_eq!(run.failure.unwrap().stage, RunStage::Evaluating);
    }

    #[tokio::test]
    async fn test_backend_panic_becomes_run_failure() {
        let f = fixture(Arc::new(PanickingBackend)).await;
        add_approved(&f.corpus, &[("Hello", "Hujambo"), ("Goodbye", "Kwaheri")]).await;

        let run = f.pipeline.run(Scope::pair("en", "sw")).await.unwrap();
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, RunStage::Training);
        assert!(failure.cause.contains("panicked"));
        assert_eq!(f.corpus.len().await, 2);
    }

    #[tokio::test]
    async fn test_artifact_panic_during_evaluation_fails_the_run() {
        let f = fixture(Arc::new(BrokenArtifactBackend)).await;
        add_approved(&f.corpus, &[("Hello", "Hujambo"), ("Goodbye", "Kwaheri")]).await;

        let id = f.pipeline.start_training_run(Scope::pair("en", "sw")).await.unwrap();
        let run = loop {
            let run = f.pipeline.run_status(id).await.unwrap();
            if run.state.is_terminal() {
                break run;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        assert_eq!(run.state, RunStage::Failed);
        assert!(run.finished_at.is_some());
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, RunStage::Evaluating);
        assert!(failure.cause.contains("panicked"));

        let version = f.models.version(run.version_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(version.status, VersionStatus::Failed);
    }

    #[tokio::test]
    async fn test_backend_error_becomes_run_failure() {
        let f = fixture(Arc::new(RejectingBackend)).await;
        add_approved(&f.corpus, &[("Hello", "Hujambo"), ("Goodbye", "Kwaheri")]).await;

        let run = f.pipeline.run(Scope::pair("en", "sw")).await.unwrap();
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, RunStage::Training);
        assert!(failure.cause.contains("unsupported language pair"));
    }

    #[tokio::test]
    async fn test_unknown_scope_language_is_rejected_up_front() {
        let f = fixture(Arc::new(DictionaryBackend)).await;
        let err = f.pipeline.run(Scope::pair("en", "xx")).await.unwrap_err();
        assert_eq!(err, PipelineError::UnknownLanguage("xx".into()));
        assert!(f.pipeline.runs_for(&Scope::pair("en", "xx")).await.is_empty());
    }

    #[tokio::test]
    async fn test_background_run_completes() {
        let f = fixture(Arc::new(DictionaryBackend)).await;
        add_approved(&f.corpus, &[("Hello", "Hujambo"), ("Goodbye", "Kwaheri")]).await;

        let id = f.pipeline.start_training_run(Scope::pair("en", "sw")).await.unwrap();
        let run = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let run = f.pipeline.run_status(id).await.unwrap();
                if run.state.is_terminal() {
                    return run;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(run.state, RunStage::Ready);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_run_status_unknown_id() {
        let f = fixture(Arc::new(DictionaryBackend)).await;
        assert_eq!(
            f.pipeline.run_status(99).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
