//! In-process phrase-table backend.
//!
//! "Training" memorizes every (source, target) pair of the dataset; inference
//! is an exact phrase lookup on normalized, lower-cased text. Unknown phrases
//! come back bracketed with a low score so they are never mistaken for a
//! confident answer. Deterministic, which makes it the default for tests and
//! for bootstrapping languages with tiny corpora.

use super::{
    FitOutput, Generation, ModelError, Scope, TrainingExample, TranslationModel,
    TranslationModelBackend,
};
use crate::cache::normalize_text;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Score reported for a phrase found in the table.
pub const KNOWN_PHRASE_CONFIDENCE: f64 = 0.85;
/// Score reported for a passthrough of an unknown phrase.
pub const UNKNOWN_PHRASE_CONFIDENCE: f64 = 0.1;

type PhraseKey = (String, String, String);

fn phrase_key(text: &str, source_lang: &str, target_lang: &str) -> PhraseKey {
    (
        source_lang.to_string(),
        target_lang.to_string(),
        normalize_text(text).to_lowercase(),
    )
}

#[derive(Debug, Default, Clone)]
pub struct DictionaryModel {
    phrases: HashMap<PhraseKey, String>,
}

impl DictionaryModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one phrase pair. Later entries for the same phrase win.
    pub fn with_phrase(mut self, source_lang: &str, target_lang: &str, source: &str, target: &str) -> Self {
        self.insert(source_lang, target_lang, source, target);
        self
    }

    pub fn insert(&mut self, source_lang: &str, target_lang: &str, source: &str, target: &str) {
        self.phrases.insert(
            phrase_key(source, source_lang, target_lang),
            normalize_text(target),
        );
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

#[async_trait]
impl TranslationModel for DictionaryModel {
    async fn generate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Generation, ModelError> {
        let generation = match self.phrases.get(&phrase_key(text, source_lang, target_lang)) {
            Some(target) => Generation {
                text: target.clone(),
                confidence: KNOWN_PHRASE_CONFIDENCE,
            },
            None => Generation {
                text: format!("[{}]", normalize_text(text)),
                confidence: UNKNOWN_PHRASE_CONFIDENCE,
            },
        };
        Ok(generation)
    }
}

/// Backend producing [`DictionaryModel`] artifacts.
#[derive(Debug, Default, Clone)]
pub struct DictionaryBackend;

#[async_trait]
impl TranslationModelBackend for DictionaryBackend {
    fn name(&self) -> &str {
        "dictionary"
    }

    async fn fit(
        &self,
        scope: &Scope,
        examples: &[TrainingExample],
        epochs: u32,
    ) -> Result<FitOutput, ModelError> {
        if examples.is_empty() {
            return Err(ModelError::Training(format!("no examples for {}", scope)));
        }

        let mut model = DictionaryModel::new();
        for example in examples {
            model.insert(
                &example.source_lang,
                &example.target_lang,
                &example.source_text,
                &example.target_text,
            );
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("phrases".to_string(), model.len() as f64);
        metrics.insert("examples".to_string(), examples.len() as f64);
        metrics.insert("epochs".to_string(), f64::from(epochs));

        Ok(FitOutput {
            artifact: Arc::new(model),
            metrics,
        })
    }
}
