//! Append-only parallel corpus.
//!
//! Record text is never edited. A correction is a new record pointing at the
//! one it supersedes, so the full history of every phrase stays auditable.
//! The only mutable field is `verification_status`, and it only moves out of
//! `pending` once, through moderation.

use crate::cache::normalize_text;
use crate::error::{PipelineError, Result};
use crate::languages::LanguageRegistry;
use crate::model::Scope;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Gathered by data collection
    Collected,
    /// Submitted by the community and approved by a moderator
    Contributed,
    /// Spawned by feedback that supplied a better translation
    Corrected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusRecord {
    pub id: u64,
    pub source_text: String,
    pub target_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub domain: String,
    pub provenance: Provenance,
    pub verification_status: VerificationStatus,
    /// Record this one corrects, if any
    pub supersedes: Option<u64>,
    /// Free-form origin label from collection (e.g. "manual_collection")
    pub origin: Option<String>,
    pub created_at: DateTime<Utc>,
    pub moderated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub source_text: String,
    pub target_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub domain: String,
    pub provenance: Provenance,
    pub verification_status: VerificationStatus,
    pub supersedes: Option<u64>,
    pub origin: Option<String>,
}

impl NewRecord {
    pub fn new(
        source_text: &str,
        target_text: &str,
        source_lang: &str,
        target_lang: &str,
        provenance: Provenance,
        verification_status: VerificationStatus,
    ) -> Self {
        Self {
            source_text: source_text.to_string(),
            target_text: target_text.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            domain: "general".to_string(),
            provenance,
            verification_status,
            supersedes: None,
            origin: None,
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }
}

/// Immutable selection of approved records feeding one training run.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// SHA-256 fingerprint of the scope and the sorted record ids
    pub id: String,
    pub scope: Scope,
    pub records: Vec<CorpusRecord>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn record_ids(&self) -> Vec<u64> {
        self.records.iter().map(|record| record.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Record format written by the data-collection tool.
#[derive(Debug, Deserialize)]
struct CollectedRecord {
    text: String,
    translation: String,
    source_lang: String,
    target_lang: String,
    #[serde(default = "default_domain")]
    domain: String,
    #[serde(default)]
    source: Option<String>,
}

fn default_domain() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct CorpusState {
    records: Vec<CorpusRecord>,
    snapshots: HashMap<String, Snapshot>,
}

pub struct CorpusStore {
    languages: Arc<LanguageRegistry>,
    state: RwLock<CorpusState>,
}

impl CorpusStore {
    pub fn new(languages: Arc<LanguageRegistry>) -> Self {
        Self {
            languages,
            state: RwLock::new(CorpusState::default()),
        }
    }

    /// Validate and append a record. Text is whitespace-normalized; both
    /// languages must be active.
    pub async fn append(&self, new: NewRecord) -> Result<CorpusRecord> {
        let source_text = normalize_text(&new.source_text);
        let target_text = normalize_text(&new.target_text);
        if source_text.is_empty() || target_text.is_empty() {
            return Err(PipelineError::Validation(
                "corpus record needs both source and target text".into(),
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
        if let Some(superseded) = new.supersedes {
            if !state.records.iter().any(|record| record.id == superseded) {
                return Err(PipelineError::not_found("corpus record", superseded));
            }
        }

        let record = CorpusRecord {
            id: state.records.len() as u64 + 1,
            source_text,
            target_text,
            source_lang: new.source_lang,
            target_lang: new.target_lang,
            domain: new.domain,
            provenance: new.provenance,
            verification_status: new.verification_status,
            supersedes: new.supersedes,
            origin: new.origin,
            created_at: Utc::now(),
            moderated_at: None,
        };
        state.records.push(record.clone());
        Ok(record)
    }

    pub async fn get(&self, id: u64) -> Result<CorpusRecord> {
        self.state
            .read()
            .await
            .records
            .iter()
            .find(|record| record.id == id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("corpus record", id))
    }

    /// Move a pending record to approved or rejected. Reserved for the
    /// moderation loop.
    pub(crate) async fn set_verification(
        &self,
        id: u64,
        status: VerificationStatus,
    ) -> Result<CorpusRecord> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| PipelineError::not_found("corpus record", id))?;

        if record.verification_status != VerificationStatus::Pending {
            return Err(PipelineError::Conflict(format!(
                "corpus record {} is already {:?}",
                id, record.verification_status
            )));
        }
        record.verification_status = status;
        record.moderated_at = Some(Utc::now());
        Ok(record.clone())
    }

    /// Every record ever written for a phrase, oldest first.
    pub async fn history(&self, source_text: &str, source_lang: &str, target_lang: &str) -> Vec<CorpusRecord> {
        let source_text = normalize_text(source_text);
        self.state
            .read()
            .await
            .records
            .iter()
            .filter(|record| {
                record.source_text == source_text
                    && record.source_lang == source_lang
                    && record.target_lang == target_lang
            })
            .cloned()
            .collect()
    }

    pub async fn count_by_status(&self) -> BTreeMap<String, usize> {
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for record in &state.records {
            let key = match record.verification_status {
                VerificationStatus::Pending => "pending",
                VerificationStatus::Approved => "approved",
                VerificationStatus::Rejected => "rejected",
            };
            *counts.entry(key.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Directed pairs with at least one approved record, with their counts.
    pub async fn approved_pairs(&self) -> BTreeMap<(String, String), usize> {
        let state = self.state.read().await;
        let mut pairs = BTreeMap::new();
        for record in state
            .records
            .iter()
            .filter(|record| record.verification_status == VerificationStatus::Approved)
        {
            *pairs
                .entry((record.source_lang.clone(), record.target_lang.clone()))
                .or_insert(0) += 1;
        }
        pairs
    }

    /// Every approved text with the language it is written in, both sides of
    /// each record.
    pub async fn approved_texts(&self) -> Vec<(String, String)> {
        let state = self.state.read().await;
        state
            .records
            .iter()
            .filter(|record| record.verification_status == VerificationStatus::Approved)
            .flat_map(|record| {
                [
                    (record.source_lang.clone(), record.source_text.clone()),
                    (record.target_lang.clone(), record.target_text.clone()),
                ]
            })
            .collect()
    }

    /// Freeze the approved records of a scope into a fingerprinted snapshot.
    /// Taking the same snapshot twice yields the same id.
    pub async fn snapshot(&self, scope: &Scope) -> Snapshot {
        let mut state = self.state.write().await;
        let mut records: Vec<CorpusRecord> = state
            .records
            .iter()
            .filter(|record| {
                record.verification_status == VerificationStatus::Approved
                    && scope.covers(&record.source_lang, &record.target_lang)
            })
            .cloned()
            .collect();
        records.sort_by_key(|record| record.id);

        let id = fingerprint(scope, records.iter().map(|record| record.id));
        let snapshot = state
            .snapshots
            .entry(id.clone())
            .or_insert_with(|| Snapshot {
                id,
                scope: scope.clone(),
                records,
                taken_at: Utc::now(),
            })
            .clone();
        snapshot
    }

    /// A previously taken snapshot, for reproducing or auditing a run.
    pub async fn get_snapshot(&self, id: &str) -> Result<Snapshot> {
        self.state
            .read()
            .await
            .snapshots
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("snapshot", id))
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Load a collected-corpus JSON file (array of `{text, translation,
    /// source_lang, target_lang, domain, source}`). Records that fail
    /// validation are skipped and logged.
    pub async fn import_json(
        &self,
        path: &Path,
        status: VerificationStatus,
    ) -> anyhow::Result<ImportSummary> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read corpus file {}", path.display()))?;
        let collected: Vec<CollectedRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse corpus file {}", path.display()))?;

        let mut summary = ImportSummary::default();
        for item in collected {
            let new = NewRecord {
                origin: item.source,
                ..NewRecord::new(
                    &item.text,
                    &item.translation,
                    &item.source_lang,
                    &item.target_lang,
                    Provenance::Collected,
                    status,
                )
                .with_domain(&item.domain)
            };
            match self.append(new).await {
                Ok(_) => summary.imported += 1,
                Err(e) => {
                    warn!("Skipping record from {}: {}", path.display(), e);
                    summary.skipped += 1;
                }
            }
        }

        info!(
            "Imported {} records from {} ({} skipped)",
            summary.imported,
            path.display(),
            summary.skipped
        );
        Ok(summary)
    }
}

fn fingerprint(scope: &Scope, ids: impl Iterator<Item = u64>) -> String {
    let mut hasher = Sha256::new();
    // Length-prefixed fields, so no two scopes encode to the same bytes
    let fields: Vec<&str> = match scope {
        Scope::Pair { source, target } => vec!["pair", source, target],
        Scope::Multilingual { name, languages } => std::iter::once("multi")
            .chain(std::iter::once(name.as_str()))
            .chain(languages.iter().map(String::as_str))
            .collect(),
    };
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    for id in ids {
        hasher.update(b"\n");
        hasher.update(id.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}
