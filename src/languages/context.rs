//! Cultural notes attached to individual phrases of a language.

use super::registry::LanguageRegistry;
use crate::cache::normalize_text;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CulturalNote {
    pub meaning: String,
    pub cultural_note: String,
    pub usage: String,
    /// Customary reply, for greetings and courtesies
    pub response: Option<String>,
}

impl CulturalNote {
    pub fn new(meaning: &str, cultural_note: &str, usage: &str) -> Self {
        Self {
            meaning: meaning.to_string(),
            cultural_note: cultural_note.to_string(),
            usage: usage.to_string(),
            response: None,
        }
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.response = Some(response.to_string());
        self
    }
}

fn phrase_key(phrase: &str) -> String {
    normalize_text(phrase).to_lowercase()
}

/// Phrase-level cultural context, keyed by language code and the
/// case-insensitive normalized phrase.
pub struct CulturalContext {
    languages: Arc<LanguageRegistry>,
    notes: RwLock<HashMap<String, BTreeMap<String, CulturalNote>>>,
}

impl CulturalContext {
    pub fn new(languages: Arc<LanguageRegistry>) -> Self {
        Self {
            languages,
            notes: RwLock::new(HashMap::new()),
        }
    }

    /// A store pre-loaded with [`default_notes`].
    pub fn with_defaults(languages: Arc<LanguageRegistry>) -> Self {
        let mut notes: HashMap<String, BTreeMap<String, CulturalNote>> = HashMap::new();
        for (code, phrase, note) in default_notes() {
            notes
                .entry(code.to_string())
                .or_default()
                .insert(phrase_key(phrase), note);
        }
        Self {
            languages,
            notes: RwLock::new(notes),
        }
    }

    /// Context for `phrase` in language `code`, if any is recorded.
    pub async fn lookup(&self, code: &str, phrase: &str) -> Result<Option<CulturalNote>> {
        self.languages.require_active(code).await?;
        Ok(self
            .notes
            .read()
            .await
            .get(code)
            .and_then(|phrases| phrases.get(&phrase_key(phrase)))
            .cloned())
    }

    /// Record context for a phrase, returning the note it replaces.
    pub async fn upsert(
        &self,
        code: &str,
        phrase: &str,
        note: CulturalNote,
    ) -> Result<Option<CulturalNote>> {
        self.languages.require_active(code).await?;
        let key = phrase_key(phrase);
        if key.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        if note.meaning.trim().is_empty() {
            return Err(PipelineError::Validation("cultural note needs a meaning".into()));
        }

        let previous = self
            .notes
            .write()
            .await
            .entry(code.to_string())
            .or_default()
            .insert(key.clone(), note);
        info!("Cultural context for '{}' ({}) recorded", key, code);
        Ok(previous)
    }

    /// Phrases with recorded context for a language, alphabetically.
    pub async fn phrases(&self, code: &str) -> Vec<String> {
        self.notes
            .read()
            .await
            .get(code)
            .map(|phrases| phrases.keys().cloned().collect())
            .unwrap_or_default()
    }
}

pub fn default_notes() -> Vec<(&'static str, &'static str, CulturalNote)> {
    vec![
        (
            "sw",
            "hujambo",
            CulturalNote::new(
                "Hello, how are you?",
                "A common greeting in Swahili, used throughout East Africa",
                "Can be used at any time of day",
            )
            .with_response("Sijambo (I'm fine) or Salama (peace)"),
        ),
        (
            "sw",
            "asante",
            CulturalNote::new(
                "Thank you",
                "Shows respect and appreciation",
                "Used after receiving help or gifts",
            )
            .with_response("Karibu (you're welcome)"),
        ),
        (
            "ki",
            "ni wega",
            CulturalNote::new(
                "It's good/well",
                "Common response to greetings in Kikuyu",
                "Used to express that things are going well",
            )
            .with_response("Wega muno (very good)"),
        ),
    ]
}
