//! Feedback and moderation loop.
//!
//! Ratings and corrections come in here. A rating never changes history: it
//! is appended to the feedback log and, when it says the translation is
//! wrong, lowers the confidence of the cached entry. A supplied correction
//! becomes a pending corpus record plus a queued contribution; only a
//! moderator's approval lets it reach the cache and future training
//! snapshots.

use crate::cache::{normalize_text, CacheEntry, CacheKey, TranslationCache};
use crate::corpus::{CorpusRecord, CorpusStore, NewRecord, Provenance, VerificationStatus};
use crate::error::{PipelineError, Result};
use crate::languages::LanguageRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// What a piece of feedback is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedbackRef {
    /// A served translation, by cache key
    Cache(CacheKey),
    /// A corpus record, by id
    Record { id: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRecord {
    pub id: u64,
    pub translation_ref: FeedbackRef,
    pub rating: u8,
    pub is_correct: Option<bool>,
    pub corrected_text: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub translation_ref: FeedbackRef,
    pub rating: u8,
    pub is_correct: Option<bool>,
    pub corrected_text: Option<String>,
    pub note: Option<String>,
}

impl NewFeedback {
    pub fn rating(translation_ref: FeedbackRef, rating: u8) -> Self {
        Self {
            translation_ref,
            rating,
            is_correct: None,
            corrected_text: None,
            note: None,
        }
    }

    pub fn incorrect(mut self) -> Self {
        self.is_correct = Some(false);
        self
    }

    pub fn with_correction(mut self, corrected_text: &str) -> Self {
        self.corrected_text = Some(corrected_text.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContributionKind {
    /// A new translation pair from the community
    Translation,
    /// A correction, already recorded as a pending corpus record
    Correction { record_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub id: u64,
    pub kind: ContributionKind,
    pub source_text: String,
    pub target_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub domain: String,
    pub contributor_note: Option<String>,
    pub status: VerificationStatus,
    pub moderator_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewContribution {
    pub source_text: String,
    pub target_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub domain: String,
    pub note: Option<String>,
}

impl NewContribution {
    pub fn new(source_text: &str, target_text: &str, source_lang: &str, target_lang: &str) -> Self {
        Self {
            source_text: source_text.to_string(),
            target_text: target_text.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            domain: "general".to_string(),
            note: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Everything a feedback submission changed.
#[derive(Debug, Clone)]
pub struct FeedbackOutcome {
    pub feedback: FeedbackRecord,
    /// The cache entry after confidence decay, if one was decayed
    pub cache_entry: Option<CacheEntry>,
    /// The queued correction, if corrected text was supplied
    pub correction: Option<Contribution>,
}

/// Everything a moderation decision changed.
#[derive(Debug, Clone)]
pub struct ModerationOutcome {
    pub contribution: Contribution,
    pub record: Option<CorpusRecord>,
    pub cache_entry: Option<CacheEntry>,
}

#[derive(Default)]
struct LoopState {
    feedback: Vec<FeedbackRecord>,
    contributions: Vec<Contribution>,
}

pub struct FeedbackLoop {
    languages: Arc<LanguageRegistry>,
    cache: Arc<TranslationCache>,
    corpus: Arc<CorpusStore>,
    decay_factor: f64,
    state: RwLock<LoopState>,
}

impl FeedbackLoop {
    pub fn new(
        languages: Arc<LanguageRegistry>,
        cache: Arc<TranslationCache>,
        corpus: Arc<CorpusStore>,
        decay_factor: f64,
    ) -> Self {
        Self {
            languages,
            cache,
            corpus,
            decay_factor: decay_factor.clamp(0.0, 1.0),
            state: RwLock::new(LoopState::default()),
        }
    }

    /// Record feedback on a served translation or a corpus record.
    ///
    /// Input is fully validated before anything is written: an out-of-range
    /// rating or a dangling reference leaves every store untouched.
    pub async fn submit_feedback(&self, new: NewFeedback) -> Result<FeedbackOutcome> {
        if !(1..=5).contains(&new.rating) {
            return Err(PipelineError::Validation(format!(
                "rating must be between 1 and 5, got {}",
                new.rating
            )));
        }
        let corrected_text = match new.corrected_text.as_deref().map(normalize_text) {
            Some(text) if text.is_empty() => {
                return Err(PipelineError::Validation("corrected text is empty".into()));
            }
            other => other,
        };

        // The cache key and the corpus record the feedback points at
        let (key, superseded) = match &new.translation_ref {
            FeedbackRef::Cache(key) => {
                if self.cache.get(key).await.is_none() {
                    return Err(PipelineError::not_found(
                        "cache entry",
                        format!("{}->{} '{}'", key.source_lang, key.target_lang, key.source_text),
                    ));
                }
                let latest = self
                    .corpus
                    .history(&key.source_text, &key.source_lang, &key.target_lang)
                    .await
                    .last()
                    .map(|record| record.id);
                (key.clone(), latest)
            }
            FeedbackRef::Record { id } => {
                let record = self.corpus.get(*id).await?;
                (
                    CacheKey::new(&record.source_text, &record.source_lang, &record.target_lang),
                    Some(record.id),
                )
            }
        };

        let correction = match &corrected_text {
            Some(text) => Some(self.queue_correction(&key, text, superseded, new.note.clone()).await?),
            None => None,
        };

        let cache_entry = if new.is_correct == Some(false) && self.cache.get(&key).await.is_some() {
            let entry = self.cache.decay_confidence(&key, self.decay_factor).await?;
            debug!(
                "Decayed confidence of {}->{} '{}' to {:.3}",
                key.source_lang, key.target_lang, key.source_text, entry.confidence_score
            );
            Some(entry)
        } else {
            None
        };

        let mut state = self.state.write().await;
        let feedback = FeedbackRecord {
            id: state.feedback.len() as u64 + 1,
            translation_ref: new.translation_ref,
            rating: new.rating,
            is_correct: new.is_correct,
            corrected_text,
            note: new.note,
            created_at: Utc::now(),
        };
        state.feedback.push(feedback.clone());

        Ok(FeedbackOutcome {
            feedback,
            cache_entry,
            correction,
        })
    }

    async fn queue_correction(
        &self,
        key: &CacheKey,
        corrected_text: &str,
        supersedes: Option<u64>,
        note: Option<String>,
    ) -> Result<Contribution> {
        let mut new_record = NewRecord::new(
            &key.source_text,
            corrected_text,
            &key.source_lang,
            &key.target_lang,
            Provenance::Corrected,
            VerificationStatus::Pending,
        );
        new_record.supersedes = supersedes;
        let record = self.corpus.append(new_record).await?;

        let mut state = self.state.write().await;
        let contribution = Contribution {
            id: state.contributions.len() as u64 + 1,
            kind: ContributionKind::Correction {
                record_id: record.id,
            },
            source_text: record.source_text,
            target_text: record.target_text,
            source_lang: record.source_lang,
            target_lang: record.target_lang,
            domain: record.domain,
            contributor_note: note,
            status: VerificationStatus::Pending,
            moderator_notes: None,
            created_at: Utc::now(),
            decided_at: None,
        };
        state.contributions.push(contribution.clone());
        info!(
            "Queued correction {} for {}->{} (record {})",
            contribution.id, contribution.source_lang, contribution.target_lang, record.id
        );
        Ok(contribution)
    }

    /// Queue a community translation for moderation.
    pub async fn contribute(&self, new: NewContribution) -> Result<Contribution> {
        let source_text = normalize_text(&new.source_text);
        let target_text = normalize_text(&new.target_text);
        if source_text.is_empty() || target_text.is_empty() {
            return Err(PipelineError::Validation(
                "contribution needs both source and target text".into(),
            ));
        }
        if new.source_lang == new.target_lang {
            return Err(PipelineError::Validation(format!(
                "source and target language are both '{}'",
                new.source_lang
            )));
        }
        self.languages
            .require_pair(&new.source_lang, &new.target_lang)
            .await?;

        let mut state = self.state.write().await;
        let contribution = Contribution {
            id: state.contributions.len() as u64 + 1,
            kind: ContributionKind::Translation,
            source_text,
            target_text,
            source_lang: new.source_lang,
            target_lang: new.target_lang,
            domain: new.domain,
            contributor_note: new.note,
            status: VerificationStatus::Pending,
            moderator_notes: None,
            created_at: Utc::now(),
            decided_at: None,
        };
        state.contributions.push(contribution.clone());
        Ok(contribution)
    }

    /// Approve or reject a pending contribution. A contribution is decided
    /// at most once; rejected ones stay in the queue for audit.
    pub async fn moderate(
        &self,
        id: u64,
        decision: Decision,
        notes: Option<String>,
    ) -> Result<ModerationOutcome> {
        // Held for the whole decision so two moderators cannot both win
        let mut state = self.state.write().await;
        let index = state
            .contributions
            .iter()
            .position(|contribution| contribution.id == id)
            .ok_or_else(|| PipelineError::not_found("contribution", id))?;

        let pending = state.contributions[index].clone();
        if pending.status != VerificationStatus::Pending {
            return Err(PipelineError::Conflict(format!(
                "contribution {} was already {:?}",
                id, pending.status
            )));
        }

        let mut record = None;
        let mut cache_entry = None;
        match (decision, pending.kind) {
            (Decision::Approve, ContributionKind::Translation) => {
                let new_record = NewRecord::new(
                    &pending.source_text,
                    &pending.target_text,
                    &pending.source_lang,
                    &pending.target_lang,
                    Provenance::Contributed,
                    VerificationStatus::Approved,
                )
                .with_domain(&pending.domain);
                record = Some(self.corpus.append(new_record).await?);
            }
            (Decision::Approve, ContributionKind::Correction { record_id }) => {
                let approved = self
                    .corpus
                    .set_verification(record_id, VerificationStatus::Approved)
                    .await?;
                let key = CacheKey::new(&approved.source_text, &approved.source_lang, &approved.target_lang);
                cache_entry = Some(self.cache.apply_correction(key, &approved.target_text).await);
                record = Some(approved);
            }
            (Decision::Reject, ContributionKind::Translation) => {}
            (Decision::Reject, ContributionKind::Correction { record_id }) => {
                record = Some(
                    self.corpus
                        .set_verification(record_id, VerificationStatus::Rejected)
                        .await?,
                );
            }
        }

        let contribution = &mut state.contributions[index];
        contribution.status = match decision {
            Decision::Approve => VerificationStatus::Approved,
            Decision::Reject => VerificationStatus::Rejected,
        };
        contribution.moderator_notes = notes;
        contribution.decided_at = Some(Utc::now());
        info!("Contribution {} {:?}", id, contribution.status);

        Ok(ModerationOutcome {
            contribution: contribution.clone(),
            record,
            cache_entry,
        })
    }

    pub async fn contribution(&self, id: u64) -> Result<Contribution> {
        self.state
            .read()
            .await
            .contributions
            .iter()
            .find(|contribution| contribution.id == id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("contribution", id))
    }

    /// The moderation queue, optionally filtered by status, oldest first.
    pub async fn contributions(&self, status: Option<VerificationStatus>) -> Vec<Contribution> {
        self.state
            .read()
            .await
            .contributions
            .iter()
            .filter(|contribution| status.map_or(true, |status| contribution.status == status))
            .cloned()
            .collect()
    }

    /// Feedback log entries about one translation, oldest first.
    pub async fn feedback_for(&self, translation_ref: &FeedbackRef) -> Vec<FeedbackRecord> {
        self.state
            .read()
            .await
            .feedback
            .iter()
            .filter(|feedback| &feedback.translation_ref == translation_ref)
            .cloned()
            .collect()
    }

    pub async fn feedback_count(&self) -> usize {
        self.state.read().await.feedback.len()
    }
}
