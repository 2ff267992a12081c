//! Versioned model registry.
//!
//! The registry is the only holder of "which version is active for a scope".
//! Promotion swaps the active version and retires the previous one under a
//! single write lock, so a concurrent reader always sees exactly one ready
//! version for a scope that has one.

use super::{
    clamp_confidence, EvaluationMetrics, Generation, ModelError, Scope, TranslationModel,
};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// A training run is producing this version
    Training,
    /// Trained and evaluated, waiting for a promotion decision
    Staged,
    /// The active version for its scope
    Ready,
    /// Previously active, replaced by a newer promotion
    Retired,
    /// The run that was producing this version failed
    Failed,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionStatus::Training => "training",
            VersionStatus::Staged => "staged",
            VersionStatus::Ready => "ready",
            VersionStatus::Retired => "retired",
            VersionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelVersion {
    pub id: String,
    pub scope: Scope,
    /// Sequence number within the scope label, starting at 1
    pub number: u32,
    pub corpus_snapshot_id: Option<String>,
    pub epochs: u32,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub trained_at: Option<DateTime<Utc>>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub evaluation_metrics: Option<EvaluationMetrics>,
    pub backend_metrics: BTreeMap<String, f64>,
    pub failure_reason: Option<String>,
}

/// The active version of a scope together with its artifact.
#[derive(Clone)]
pub struct ActiveModel {
    pub version: ModelVersion,
    model: Arc<dyn TranslationModel>,
}

impl ActiveModel {
    /// Run inference with the active artifact. The returned confidence is
    /// always within [0, 1].
    pub async fn infer(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> std::result::Result<Generation, ModelError> {
        let generation = self.model.generate(text, source_lang, target_lang).await?;
        Ok(Generation {
            confidence: clamp_confidence(generation.confidence),
            ..generation
        })
    }
}

struct Slot {
    version: ModelVersion,
    artifact: Option<Arc<dyn TranslationModel>>,
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<String, Slot>,
    active: HashMap<Scope, String>,
    /// Keyed by label: two multilingual scopes may share a name, and they
    /// must still never share a version id
    counters: HashMap<String, u32>,
}

impl RegistryState {
    fn next_version(&mut self, scope: &Scope) -> (String, u32) {
        let label = scope.label();
        let counter = self.counters.entry(label.clone()).or_insert(0);
        loop {
            *counter += 1;
            let id = format!("{}-v{}", label, counter);
            if !self.slots.contains_key(&id) {
                return (id, *counter);
            }
        }
    }

    fn slot_mut(&mut self, id: &str) -> Result<&mut Slot> {
        self.slots
            .get_mut(id)
            .ok_or_else(|| PipelineError::not_found("model version", id))
    }

    fn active_model(&self, scope: &Scope) -> Option<ActiveModel> {
        let id = self.active.get(scope)?;
        let slot = self.slots.get(id)?;
        let model = slot.artifact.clone()?;
        Some(ActiveModel {
            version: slot.version.clone(),
            model,
        })
    }
}

#[derive(Default)]
pub struct ModelRegistry {
    state: RwLock<RegistryState>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new version in `training` state for a run that is about to fit.
    pub async fn register_training(
        &self,
        scope: &Scope,
        corpus_snapshot_id: &str,
        epochs: u32,
    ) -> ModelVersion {
        let mut state = self.state.write().await;
        let (id, number) = state.next_version(scope);
        let version = ModelVersion {
            id: id.clone(),
            scope: scope.clone(),
            number,
            corpus_snapshot_id: Some(corpus_snapshot_id.to_string()),
            epochs,
            status: VersionStatus::Training,
            created_at: Utc::now(),
            trained_at: None,
            promoted_at: None,
            evaluation_metrics: None,
            backend_metrics: BTreeMap::new(),
            failure_reason: None,
        };
        state.slots.insert(
            id,
            Slot {
                version: version.clone(),
                artifact: None,
            },
        );
        version
    }

    /// Register an artifact trained outside the pipeline (a bootstrap or
    /// imported model). It lands `staged` and still needs a promotion.
    pub async fn install(&self, scope: &Scope, artifact: Arc<dyn TranslationModel>) -> ModelVersion {
        let mut state = self.state.write().await;
        let (id, number) = state.next_version(scope);
        let now = Utc::now();
        let version = ModelVersion {
            id: id.clone(),
            scope: scope.clone(),
            number,
            corpus_snapshot_id: None,
            epochs: 0,
            status: VersionStatus::Staged,
            created_at: now,
            trained_at: Some(now),
            promoted_at: None,
            evaluation_metrics: None,
            backend_metrics: BTreeMap::new(),
            failure_reason: None,
        };
        state.slots.insert(
            id,
            Slot {
                version: version.clone(),
                artifact: Some(artifact),
            },
        );
        version
    }

    /// Attach the trained artifact and its metrics; the version becomes
    /// `staged`.
    pub async fn mark_staged(
        &self,
        id: &str,
        artifact: Arc<dyn TranslationModel>,
        evaluation: EvaluationMetrics,
        backend_metrics: BTreeMap<String, f64>,
    ) -> Result<ModelVersion> {
        let mut state = self.state.write().await;
        let slot = state.slot_mut(id)?;
        if slot.version.status != VersionStatus::Training {
            return Err(PipelineError::Conflict(format!(
                "model version {} is {}, not training",
                id, slot.version.status
            )));
        }
        slot.artifact = Some(artifact);
        slot.version.status = VersionStatus::Staged;
        slot.version.trained_at = Some(Utc::now());
        slot.version.evaluation_metrics = Some(evaluation);
        slot.version.backend_metrics = backend_metrics;
        Ok(slot.version.clone())
    }

    pub async fn mark_failed(&self, id: &str, reason: &str) -> Result<ModelVersion> {
        let mut state = self.state.write().await;
        let slot = state.slot_mut(id)?;
        if slot.version.status != VersionStatus::Training {
            return Err(PipelineError::Conflict(format!(
                "model version {} is {}, not training",
                id, slot.version.status
            )));
        }
        slot.version.status = VersionStatus::Failed;
        slot.version.failure_reason = Some(reason.to_string());
        Ok(slot.version.clone())
    }

    /// Make `id` the active version of its scope, retiring the previous one
    /// in the same critical section.
    ///
    /// Staged versions promote forward; retired versions promote back
    /// (rollback). Promoting the already active version is a no-op.
    pub async fn promote(&self, id: &str) -> Result<ModelVersion> {
        let mut state = self.state.write().await;

        let (scope, status) = {
            let slot = state
                .slots
                .get(id)
                .ok_or_else(|| PipelineError::not_found("model version", id))?;
            (slot.version.scope.clone(), slot.version.status)
        };
        match status {
            VersionStatus::Ready => return Ok(state.slot_mut(id)?.version.clone()),
            VersionStatus::Staged | VersionStatus::Retired => {}
            VersionStatus::Training | VersionStatus::Failed => {
                return Err(PipelineError::Conflict(format!(
                    "model version {} is {} and cannot be promoted",
                    id, status
                )));
            }
        }

        let previous = state.active.insert(scope.clone(), id.to_string());
        if let Some(previous_id) = &previous {
            match state.slots.get_mut(previous_id) {
                Some(slot) => slot.version.status = VersionStatus::Retired,
                None => warn!("Active version {} for {} had no slot", previous_id, scope),
            }
        }

        let slot = state.slot_mut(id)?;
        slot.version.status = VersionStatus::Ready;
        slot.version.promoted_at = Some(Utc::now());
        info!(
            "Promoted {} for {} (retired: {})",
            id,
            scope,
            previous.as_deref().unwrap_or("none")
        );
        Ok(slot.version.clone())
    }

    /// The ready version for exactly this scope.
    pub async fn get_active(&self, scope: &Scope) -> Result<ModelVersion> {
        let state = self.state.read().await;
        state
            .active
            .get(scope)
            .and_then(|id| state.slots.get(id))
            .map(|slot| slot.version.clone())
            .ok_or_else(|| PipelineError::model_unavailable(scope, "no ready model version"))
    }

    /// The model that should serve `source -> target`: a ready pair model if
    /// there is one, otherwise a ready multilingual model covering both
    /// languages (lowest version id wins for determinism).
    pub async fn active_for_pair(&self, source_lang: &str, target_lang: &str) -> Result<ActiveModel> {
        let state = self.state.read().await;
        let pair = Scope::pair(source_lang, target_lang);
        if let Some(active) = state.active_model(&pair) {
            return Ok(active);
        }

        let mut candidates: Vec<&Scope> = state
            .active
            .keys()
            .filter(|scope| {
                matches!(scope, Scope::Multilingual { .. }) && scope.covers(source_lang, target_lang)
            })
            .collect();
        candidates.sort();
        candidates
            .into_iter()
            .find_map(|scope| state.active_model(scope))
            .ok_or_else(|| PipelineError::model_unavailable(&pair, "no ready model version"))
    }

    pub async fn version(&self, id: &str) -> Result<ModelVersion> {
        self.state
            .read()
            .await
            .slots
            .get(id)
            .map(|slot| slot.version.clone())
            .ok_or_else(|| PipelineError::not_found("model version", id))
    }

    /// Version history of a scope, oldest first.
    pub async fn versions(&self, scope: &Scope) -> Vec<ModelVersion> {
        let state = self.state.read().await;
        let mut versions: Vec<ModelVersion> = state
            .slots
            .values()
            .filter(|slot| &slot.version.scope == scope)
            .map(|slot| slot.version.clone())
            .collect();
        versions.sort_by_key(|version| version.number);
        versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;

    struct FixedModel(&'static str, f64);

    #[async_trait]
    impl TranslationModel for FixedModel {
        async fn generate(
            &self,
            _text: &str,
            _source_lang: &str,
            _target_lang: &str,
        ) -> std::result::Result<Generation, ModelError> {
            Ok(Generation {
                text: self.0.to_string(),
                confidence: self.1,
            })
        }
    }

    fn fixed(text: &'static str, confidence: f64) -> Arc<dyn TranslationModel> {
        Arc::new(FixedModel(text, confidence))
    }

    fn metrics() -> EvaluationMetrics {
        EvaluationMetrics {
            train_examples: 4,
            eval_examples: 1,
            exact_match: 1.0,
            token_f1: 1.0,
            mean_confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn test_get_active_without_promotion_is_unavailable() {
        let registry = ModelRegistry::new();
        let scope = Scope::pair("en", "sw");
        registry.install(&scope, fixed("x", 0.5)).await;

        let err = registry.get_active(&scope).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }

    #[tokio::test]
    async fn test_version_ids_are_sequential_per_scope() {
        let registry = ModelRegistry::new();
        let en_sw = Scope::pair("en", "sw");
        let en_ki = Scope::pair("en", "ki");

        let v1 = registry.install(&en_sw, fixed("a", 0.5)).await;
        let v2 = registry.register_training(&en_sw, "snap", 3).await;
        let other = registry.install(&en_ki, fixed("b", 0.5)).await;

        assert_eq!(v1.id, "en_sw-v1");
        assert_eq!(v2.id, "en_sw-v2");
        assert_eq!(other.id, "en_ki-v1");
    }

    #[tokio::test]
    async fn test_hyphenated_codes_keep_scopes_apart() {
        let registry = ModelRegistry::new();
        let first = Scope::pair("a", "b-c");
        let second = Scope::pair("a-b", "c");

        let one = registry.install(&first, fixed("ONE", 0.9)).await;
        registry.promote(&one.id).await.unwrap();
        let two = registry.install(&second, fixed("TWO", 0.9)).await;
        assert_ne!(one.id, two.id);

        let active = registry.active_for_pair("a", "b-c").await.unwrap();
        assert_eq!(active.version.scope, first);
        assert_eq!(active.version.status, VersionStatus::Ready);
        assert_eq!(active.infer("x", "a", "b-c").await.unwrap().text, "ONE");

        let ready = registry
            .versions(&first)
            .await
            .iter()
            .filter(|v| v.status == VersionStatus::Ready)
            .count();
        assert_eq!(ready, 1);
        assert_eq!(registry.version(&two.id).await.unwrap().scope, second);
    }

    #[tokio::test]
    async fn test_multilingual_scopes_sharing_a_name_get_distinct_ids() {
        let registry = ModelRegistry::new();
        let east = Scope::multilingual("kenya", ["en", "sw"]);
        let west = Scope::multilingual("kenya", ["en", "luo"]);

        let a = registry.install(&east, fixed("a", 0.5)).await;
        let b = registry.install(&west, fixed("b", 0.5)).await;

        assert_ne!(a.id, b.id);
        assert_eq!(registry.version(&a.id).await.unwrap().scope, east);
        assert_eq!(registry.version(&b.id).await.unwrap().scope, west);
    }

    #[tokio::test]
    async fn test_promote_retires_previous() {
        let registry = ModelRegistry::new();
        let scope = Scope::pair("en", "sw");
        let v1 = registry.install(&scope, fixed("old", 0.5)).await;
        let v2 = registry.install(&scope, fixed("new", 0.5)).await;

        registry.promote(&v1.id).await.unwrap();
        registry.promote(&v2.id).await.unwrap();

        assert_eq!(registry.get_active(&scope).await.unwrap().id, v2.id);
        let statuses: Vec<VersionStatus> =
            registry.versions(&scope).await.iter().map(|v| v.status).collect();
        assert_eq!(statuses, vec![VersionStatus::Retired, VersionStatus::Ready]);
    }

    #[tokio::test]
    async fn test_rollback_by_promoting_retired_version() {
        let registry = ModelRegistry::new();
        let scope = Scope::pair("en", "sw");
        let v1 = registry.install(&scope, fixed("old", 0.5)).await;
        let v2 = registry.install(&scope, fixed("new", 0.5)).await;
        registry.promote(&v1.id).await.unwrap();
        registry.promote(&v2.id).await.unwrap();

        registry.promote(&v1.id).await.unwrap();

        assert_eq!(registry.get_active(&scope).await.unwrap().id, v1.id);
        assert_eq!(registry.version(&v2.id).await.unwrap().status, VersionStatus::Retired);
    }

    #[tokio::test]
    async fn test_cannot_promote_training_or_failed() {
        let registry = ModelRegistry::new();
        let scope = Scope::pair("en", "sw");
        let training = registry.register_training(&scope, "snap", 3).await;
        let err = registry.promote(&training.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        registry.mark_failed(&training.id, "boom").await.unwrap();
        let err = registry.promote(&training.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_promote_unknown_version() {
        let registry = ModelRegistry::new();
        let err = registry.promote("en_sw-v9").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_mark_staged_then_promote() {
        let registry = ModelRegistry::new();
        let scope = Scope::pair("en", "sw");
        let version = registry.register_training(&scope, "snap-1", 3).await;

        let staged = registry
            .mark_staged(&version.id, fixed("Hujambo", 0.8), metrics(), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(staged.status, VersionStatus::Staged);
        assert!(staged.trained_at.is_some());

        registry.promote(&version.id).await.unwrap();
        let active = registry.active_for_pair("en", "sw").await.unwrap();
        let generation = active.infer("Hello", "en", "sw").await.unwrap();
        assert_eq!(generation.text, "Hujambo");
    }

    #[tokio::test]
    async fn test_infer_clamps_confidence() {
        let registry = ModelRegistry::new();
        let scope = Scope::pair("en", "sw");
        let version = registry.install(&scope, fixed("x", 3.5)).await;
        registry.promote(&version.id).await.unwrap();

        let active = registry.active_for_pair("en", "sw").await.unwrap();
        assert_eq!(active.infer("y", "en", "sw").await.unwrap().confidence, 1.0);
    }

    #[tokio::test]
    async fn test_active_for_pair_falls_back_to_multilingual() {
        let registry = ModelRegistry::new();
        let multi = Scope::multilingual("kenya", ["en", "sw", "luo"]);
        let version = registry.install(&multi, fixed("multi", 0.6)).await;
        registry.promote(&version.id).await.unwrap();

        let active = registry.active_for_pair("sw", "luo").await.unwrap();
        assert_eq!(active.version.scope, multi);

        let pair = Scope::pair("sw", "luo");
        let dedicated = registry.install(&pair, fixed("pair", 0.6)).await;
        registry.promote(&dedicated.id).await.unwrap();
        let active = registry.active_for_pair("sw", "luo").await.unwrap();
        assert_eq!(active.version.scope, pair);

        let err = registry.active_for_pair("en", "ki").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_promote_and_read_never_sees_zero_or_two_ready() {
        let registry = Arc::new(ModelRegistry::new());
        let scope = Scope::pair("en", "sw");
        let a = registry.install(&scope, fixed("a", 0.5)).await;
        let b = registry.install(&scope, fixed("b", 0.5)).await;
        registry.promote(&a.id).await.unwrap();

        let promoter = {
            let registry = Arc::clone(&registry);
            let ids = [a.id.clone(), b.id.clone()];
            tokio::spawn(async move {
                for i in 0..200 {
                    registry.promote(&ids[i % 2]).await.unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            let scope = scope.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    assert!(registry.get_active(&scope).await.is_ok());
                    let ready = registry
                        .versions(&scope)
                        .await
                        .iter()
                        .filter(|v| v.status == VersionStatus::Ready)
                        .count();
                    assert_eq!(ready, 1);
                }
            }));
        }

        promoter.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
