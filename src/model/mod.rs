//! Trainable translation model capability and the versioned model registry.
//!
//! The pipeline never looks inside a model. A backend knows how to `fit` a
//! dataset into an artifact, and an artifact knows how to `generate` a
//! translation with a confidence score. Everything else (versioning,
//! promotion, evaluation) lives on this side of the trait boundary.

mod dictionary;
mod registry;
mod remote;

pub use dictionary::{DictionaryBackend, DictionaryModel};
pub use registry::{ActiveModel, ModelRegistry, ModelVersion, VersionStatus};
pub use remote::{RemoteBackend, RemoteModel};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The unit a model version is trained and promoted for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// A single directed language pair
    Pair { source: String, target: String },
    /// A multilingual model covering every pair within a language set
    Multilingual {
        name: String,
        languages: BTreeSet<String>,
    },
}

impl Scope {
    pub fn pair(source: &str, target: &str) -> Self {
        Scope::Pair {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    pub fn multilingual<I, S>(name: &str, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Scope::Multilingual {
            name: name.to_string(),
            languages: languages.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a model of this scope can translate `source -> target`.
    pub fn covers(&self, source: &str, target: &str) -> bool {
        match self {
            Scope::Pair {
                source: s,
                target: t,
            } => s == source && t == target,
            Scope::Multilingual { languages, .. } => {
                source != target && languages.contains(source) && languages.contains(target)
            }
        }
    }

    /// Every language code the scope touches.
    pub fn languages(&self) -> Vec<&str> {
        match self {
            Scope::Pair { source, target } => vec![source.as_str(), target.as_str()],
            Scope::Multilingual { languages, .. } => languages.iter().map(String::as_str).collect(),
        }
    }

    /// Short label used in version ids and logs, e.g. `en_sw` or
    /// `multi:kenya`. Language codes never contain `_` or `:`, so two
    /// different pairs never share a label and no pair label looks like a
    /// multilingual one.
    pub fn label(&self) -> String {
        match self {
            Scope::Pair { source, target } => format!("{}_{}", source, target),
            Scope::Multilingual { name, .. } => format!("multi:{}", name),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// One model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    /// Model-reported score, clamped to [0, 1] before it is stored anywhere
    pub confidence: f64,
}

/// A tokenized corpus record, ready for a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub record_id: u64,
    pub source_lang: String,
    pub target_lang: String,
    pub source_text: String,
    pub target_text: String,
    pub input: Vec<String>,
    pub label: Vec<String>,
}

/// Held-out evaluation of a trained artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub train_examples: usize,
    pub eval_examples: usize,
    /// Fraction of held-out examples reproduced exactly (after normalization)
    pub exact_match: f64,
    /// Mean token-level F1 against the reference
    pub token_f1: f64,
    pub mean_confidence: f64,
}

/// Result of a backend `fit`.
pub struct FitOutput {
    pub artifact: Arc<dyn TranslationModel>,
    /// Backend-reported training metrics (loss, steps, ...), opaque here
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Network hiccup, overloaded server, rate limit: worth one more try
    #[error("transient model failure: {0}")]
    Transient(String),

    /// The backend refused the request; retrying will not help
    #[error("model rejected request: {0}")]
    Rejected(String),

    #[error("training failed: {0}")]
    Training(String),
}

impl ModelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }
}

/// A trained artifact that can translate.
#[async_trait]
pub trait TranslationModel: Send + Sync {
    async fn generate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Generation, ModelError>;
}

/// The modeling library: turns a dataset into an artifact.
#[async_trait]
pub trait TranslationModelBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn fit(
        &self,
        scope: &Scope,
        examples: &[TrainingExample],
        epochs: u32,
    ) -> Result<FitOutput, ModelError>;
}

pub(crate) fn clamp_confidence(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_scope_covers_only_its_direction() {
        let scope = Scope::pair("en", "sw");
        assert!(scope.covers("en", "sw"));
        assert!(!scope.covers("sw", "en"));
        assert_eq!(scope.label(), "en_sw");
    }

    #[test]
    fn test_multilingual_scope_covers_member_pairs() {
        let scope = Scope::multilingual("kenya", ["en", "sw", "ki"]);
        assert!(scope.covers("sw", "ki"));
        assert!(scope.covers("ki", "en"));
        assert!(!scope.covers("en", "en"));
        assert!(!scope.covers("en", "luo"));
        assert_eq!(scope.to_string(), "multi:kenya");
    }

    #[test]
    fn test_labels_do_not_collide_across_hyphenated_codes() {
        assert_ne!(Scope::pair("a", "b-c").label(), Scope::pair("a-b", "c").label());
        assert_ne!(
            Scope::pair("multi", "x").label(),
            Scope::multilingual("x", ["en", "sw"]).label()
        );
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn test_only_transient_errors_are_transient() {
        assert!(ModelError::Transient("timeout".into()).is_transient());
        assert!(!ModelError::Rejected("bad pair".into()).is_transient());
        assert!(!ModelError::Training("diverged".into()).is_transient());
    }
}
