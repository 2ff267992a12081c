//! Language identification for free text.
//!
//! Text is scored against a vocabulary per active language: a short list of
//! well-known words and phrases, plus every word of the approved corpus. The
//! registry decides which languages can be reported, so a deactivated
//! language is never detected.

use crate::corpus::CorpusStore;
use crate::error::{PipelineError, Result};
use crate::languages::{LanguageEntry, LanguageFilter, LanguageRegistry, Page};
use crate::training::tokenize;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Reported when nothing in the text matches any known vocabulary.
const FALLBACK_LANGUAGE: &str = "en";
const FALLBACK_CONFIDENCE: f64 = 0.6;

const KEYWORDS: &[(&str, &[&str])] = &[
    ("sw", &["hujambo", "asante", "kwaheri", "habari", "mzuri", "sana"]),
    ("ki", &["ni wega", "wendo", "mukinyu", "gikuyu"]),
    ("luo", &["oyawore", "adhi", "dholuo", "joluo"]),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageGuess {
    pub language: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub language: String,
    pub confidence: f64,
    /// Other candidates, most likely first
    pub alternatives: Vec<LanguageGuess>,
}

fn is_word(token: &str) -> bool {
    token.chars().any(char::is_alphanumeric)
}

pub struct LanguageDetector {
    languages: Arc<LanguageRegistry>,
    corpus: Arc<CorpusStore>,
}

impl LanguageDetector {
    pub fn new(languages: Arc<LanguageRegistry>, corpus: Arc<CorpusStore>) -> Self {
        Self { languages, corpus }
    }

    /// Identify the language of `text`.
    ///
    /// Each candidate scores one point per distinct word (or keyword phrase)
    /// of the text found in its vocabulary. Confidence is a candidate's share
    /// of all points; ties go to the higher-priority tier, then the code.
    pub async fn detect_language(&self, text: &str) -> Result<Detection> {
        let tokens: Vec<String> = tokenize(text, usize::MAX)
            .into_iter()
            .filter(|token| is_word(token))
            .collect();
        if tokens.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let distinct: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let padded = format!(" {} ", tokens.join(" "));

        let (candidates, _) = self
            .languages
            .list(&LanguageFilter::default(), Page::new(1, usize::MAX))
            .await;
        let vocabulary = self.vocabulary().await;

        let mut scored: Vec<(usize, LanguageEntry)> = Vec::new();
        for entry in candidates {
            let mut score = vocabulary
                .get(&entry.code)
                .map_or(0, |words| distinct.iter().filter(|token| words.contains(**token)).count());
            score += KEYWORDS
                .iter()
                .filter(|(code, _)| *code == entry.code)
                .flat_map(|(_, phrases)| phrases.iter())
                .filter(|phrase| phrase.contains(' ') && padded.contains(&format!(" {} ", phrase)))
                .count();
            if score > 0 {
                scored.push((score, entry));
            }
        }

        let total: usize = scored.iter().map(|(score, _)| score).sum();
        if total == 0 {
            let fallback = self.languages.require_active(FALLBACK_LANGUAGE).await?;
            debug!("No vocabulary match, reporting {}", fallback.code);
            return Ok(Detection {
                language: fallback.code,
                confidence: FALLBACK_CONFIDENCE,
                alternatives: Vec::new(),
            });
        }

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.tier.number().cmp(&b.1.tier.number()))
                .then_with(|| a.1.code.cmp(&b.1.code))
        });
        let mut guesses = scored.into_iter().map(|(score, entry)| LanguageGuess {
            language: entry.code,
            confidence: score as f64 / total as f64,
        });
        let Some(best) = guesses.next() else {
            return Err(PipelineError::EmptyInput);
        };
        debug!("Detected {} ({:.2})", best.language, best.confidence);

        Ok(Detection {
            language: best.language,
            confidence: best.confidence,
            alternatives: guesses.collect(),
        })
    }

    async fn vocabulary(&self) -> HashMap<String, HashSet<String>> {
        let mut vocabulary: HashMap<String, HashSet<String>> = HashMap::new();
        for (code, phrases) in KEYWORDS {
            let words = vocabulary.entry(code.to_string()).or_default();
            words.extend(phrases.iter().filter(|p| !p.contains(' ')).map(|p| p.to_string()));
        }
        for (code, text) in self.corpus.approved_texts().await {
            vocabulary
                .entry(code)
                .or_default()
                .extend(tokenize(&text, usize::MAX).into_iter().filter(|token| is_word(token)));
        }
        vocabulary
    }
}
