//! Language registry: single validation gate for language codes.
//!
//! Every component that accepts a language code goes through
//! [`LanguageRegistry::require_active`] instead of looking codes up on its
//! own, so an unknown or deactivated code fails the same way everywhere.

use super::entry::{
    LanguageEntry, LanguageFilter, LanguagePatch, LanguageStatus, NewLanguage, Page, Tier,
};
use crate::error::{PipelineError, Result};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

const MAX_CODE_LEN: usize = 10;

#[derive(Default)]
struct RegistryState {
    entries: Vec<LanguageEntry>,
    next_id: u32,
}

impl RegistryState {
    fn by_code(&self, code: &str) -> Option<&LanguageEntry> {
        self.entries.iter().find(|entry| entry.code == code)
    }

    fn insert(&mut self, new: NewLanguage) -> LanguageEntry {
        self.next_id += 1;
        let entry = LanguageEntry {
            id: self.next_id,
            code: new.code,
            name: new.name,
            family: new.family,
            tier: new.tier,
            status: new.status,
            speaker_count: new.speaker_count,
            orthography_notes: new.orthography_notes,
            cultural_context: new.cultural_context,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.entries.push(entry.clone());
        entry
    }
}

/// Registry of supported languages.
#[derive(Default)]
pub struct LanguageRegistry {
    state: RwLock<RegistryState>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-loaded with [`default_languages`].
    pub async fn with_defaults() -> Self {
        let registry = Self::new();
        registry.seed_defaults().await;
        registry
    }

    /// Look up a language by code, active or not.
    pub async fn resolve(&self, code: &str) -> Result<LanguageEntry> {
        self.state
            .read()
            .await
            .by_code(code)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("language", code))
    }

    /// Validation gate: the code must exist and be active.
    pub async fn require_active(&self, code: &str) -> Result<LanguageEntry> {
        match self.state.read().await.by_code(code) {
            Some(entry) if entry.active => Ok(entry.clone()),
            _ => Err(PipelineError::UnknownLanguage(code.to_string())),
        }
    }

    /// Validate both sides of a translation pair under one read lock.
    pub async fn require_pair(
        &self,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(LanguageEntry, LanguageEntry)> {
        let state = self.state.read().await;
        let lookup = |code: &str| match state.by_code(code) {
            Some(entry) if entry.active => Ok(entry.clone()),
            _ => Err(PipelineError::UnknownLanguage(code.to_string())),
        };
        Ok((lookup(source_lang)?, lookup(target_lang)?))
    }

    /// Filtered, paginated listing. Returns the page and the total number of
    /// matches before pagination.
    pub async fn list(&self, filter: &LanguageFilter, page: Page) -> (Vec<LanguageEntry>, usize) {
        let state = self.state.read().await;
        let matching: Vec<&LanguageEntry> =
            state.entries.iter().filter(|entry| filter.matches(entry)).collect();
        let total = matching.len();
        let entries = matching
            .into_iter()
            .skip(page.offset())
            .take(page.size)
            .cloned()
            .collect();
        (entries, total)
    }

    pub async fn list_by_tier(&self, tier: Tier) -> Vec<LanguageEntry> {
        let filter = LanguageFilter {
            tier: Some(tier),
            ..Default::default()
        };
        self.list(&filter, Page::new(1, usize::MAX)).await.0
    }

    pub async fn create(&self, new: NewLanguage) -> Result<LanguageEntry> {
        validate_code(&new.code)?;
        if new.name.trim().is_empty() {
            return Err(PipelineError::Validation("language name is empty".into()));
        }

        let mut state = self.state.write().await;
        if state.by_code(&new.code).is_some() {
            return Err(PipelineError::Conflict(format!(
                "language with code '{}' already exists",
                new.code
            )));
        }
        if state.entries.iter().any(|entry| entry.name == new.name) {
            return Err(PipelineError::Conflict(format!(
                "language named '{}' already exists",
                new.name
            )));
        }

        let entry = state.insert(new);
        info!("Registered language {} ({})", entry.name, entry.code);
        Ok(entry)
    }

    pub async fn update(&self, id: u32, patch: LanguagePatch) -> Result<LanguageEntry> {
        if matches!(patch.name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(PipelineError::Validation("language name is empty".into()));
        }

        let mut state = self.state.write().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| PipelineError::not_found("language", id))?;

        if let Some(name) = patch.name {
            entry.name = name;
        }
        if let Some(family) = patch.family {
            entry.family = Some(family);
        }
        if let Some(tier) = patch.tier {
            entry.tier = tier;
        }
        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(speaker_count) = patch.speaker_count {
            entry.speaker_count = Some(speaker_count);
        }
        if let Some(notes) = patch.orthography_notes {
            entry.orthography_notes = Some(notes);
        }
        if let Some(context) = patch.cultural_context {
            entry.cultural_context = Some(context);
        }
        if let Some(active) = patch.active {
            entry.active = active;
        }
        entry.updated_at = Some(Utc::now());

        Ok(entry.clone())
    }

    /// Soft-delete: the entry stays resolvable but stops passing the gate.
    pub async fn deactivate(&self, id: u32) -> Result<LanguageEntry> {
        self.update(
            id,
            LanguagePatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Load [`default_languages`] into an empty registry. Returns how many
    /// entries were added (zero if the registry already had data).
    pub async fn seed_defaults(&self) -> usize {
        let mut state = self.state.write().await;
        if !state.entries.is_empty() {
            info!("Languages already seeded, skipping");
            return 0;
        }

        let defaults = default_languages();
        let count = defaults.len();
        for language in defaults {
            state.insert(language);
        }
        info!("Seeded {} languages", count);
        count
    }
}

fn validate_code(code: &str) -> Result<()> {
    let well_formed = !code.is_empty()
        && code.len() <= MAX_CODE_LEN
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "invalid language code '{}': expected 1-{} lowercase ASCII characters",
            code, MAX_CODE_LEN
        )))
    }
}

fn language(
    code: &str,
    name: &str,
    family: &str,
    tier: Tier,
    status: LanguageStatus,
    speakers: u64,
    context: &str,
) -> NewLanguage {
    NewLanguage {
        family: Some(family.to_string()),
        status,
        speaker_count: Some(speakers),
        cultural_context: Some(context.to_string()),
        ..NewLanguage::new(code, name, tier)
    }
}

/// Initial language set: English as the bridge language plus the Kenyan
/// languages served by the platform, five per tier.
pub fn default_languages() -> Vec<NewLanguage> {
    use LanguageStatus::{Active, CriticallyEndangered, Endangered};
    use Tier::{High, Low, Medium};

    vec![
        language("en", "English", "Germanic", High, Active, 1_500_000_000, "Bridge language for translation pairs"),
        // Tier 1
        language("sw", "Swahili", "Bantu", High, Active, 15_000_000, "National language of Kenya and Tanzania, widely spoken across East Africa"),
        language("ki", "Kikuyu", "Bantu", High, Active, 8_000_000, "Major language of the Kikuyu people, central Kenya"),
        language("luo", "Luo", "Nilotic", High, Active, 5_000_000, "Language of the Luo people, western Kenya"),
        language("luy", "Luhya", "Bantu", High, Active, 6_000_000, "Language family of the Luhya people, western Kenya"),
        language("kam", "Kamba", "Bantu", High, Active, 4_000_000, "Language of the Kamba people, eastern Kenya"),
        // Tier 2
        language("kln", "Kalenjin", "Nilotic", Medium, Active, 5_000_000, "Language family of the Kalenjin people, Rift Valley"),
        language("guz", "Kisii", "Bantu", Medium, Active, 2_000_000, "Language of the Kisii people, southwestern Kenya"),
        language("mer", "Meru", "Bantu", Medium, Active, 2_000_000, "Language of the Meru people, eastern Kenya"),
        language("tuv", "Turkana", "Nilotic", Medium, Active, 1_000_000, "Language of the Turkana people, northwestern Kenya"),
        language("mas", "Maasai", "Nilotic", Medium, Active, 1_000_000, "Language of the Maasai people, southern Kenya and northern Tanzania"),
        // Tier 3
        language("saq", "Samburu", "Nilotic", Low, Endangered, 200_000, "Language of the Samburu people, northern Kenya"),
        language("pko", "Pokot", "Nilotic", Low, Endangered, 200_000, "Language of the Pokot people, northwestern Kenya"),
        language("gax", "Borana", "Cushitic", Low, Endangered, 100_000, "Language of the Borana people, northern Kenya"),
        language("rel", "Rendille", "Cushitic", Low, Endangered, 50_000, "Language of the Rendille people, northern Kenya"),
        language("elo", "El Molo", "Cushitic", Low, CriticallyEndangered, 1_000, "Critically endangered language of the El Molo people, northern Kenya"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_seed_defaults_loads_all_tiers() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.seed_defaults().await, 16);

        assert_eq!(registry.list_by_tier(Tier::Medium).await.len(), 5);
        assert_eq!(registry.list_by_tier(Tier::Low).await.len(), 5);
        // English joins the five tier-1 Kenyan languages
        assert_eq!(registry.list_by_tier(Tier::High).await.len(), 6);
    }

    #[tokio::test]
    async fn test_seed_defaults_is_noop_on_populated_registry() {
        let registry = LanguageRegistry::with_defaults().await;
        assert_eq!(registry.seed_defaults().await, 0);
    }

    #[tokio::test]
    async fn test_resolve_known_and_unknown() {
        let registry = LanguageRegistry::with_defaults().await;

        let swahili = registry.resolve("sw").await.unwrap();
        assert_eq!(swahili.name, "Swahili");
        assert_eq!(swahili.tier, Tier::High);

        let err = registry.resolve("fr").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_require_active_rejects_deactivated() {
        let registry = LanguageRegistry::with_defaults().await;
        let elmolo = registry.resolve("elo").await.unwrap();
        registry.deactivate(elmolo.id).await.unwrap();

        let err = registry.require_active("elo").await.unwrap_err();
        assert_eq!(err, PipelineError::UnknownLanguage("elo".into()));

        // Still resolvable for history, just not servable
        assert!(!registry.resolve("elo").await.unwrap().active);
    }

    #[tokio::test]
    async fn test_require_pair_reports_offending_code() {
        let registry = LanguageRegistry::with_defaults().await;
        assert!(registry.require_pair("en", "sw").await.is_ok());

        let err = registry.require_pair("en", "zz").await.unwrap_err();
        assert_eq!(err, PipelineError::UnknownLanguage("zz".into()));
    }

    #[tokio::test]
    async fn test_create_conflict_on_duplicate_code() {
        let registry = LanguageRegistry::with_defaults().await;
        let err = registry
            .create(NewLanguage::new("sw", "Kiswahili", Tier::High))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_validates_code() {
        let registry = LanguageRegistry::new();
        for bad in ["", "EN", "waytoolongcode", "e n"] {
            let err = registry
                .create(NewLanguage::new(bad, "Test", Tier::Low))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "code {:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_update_applies_only_supplied_fields() {
        let registry = LanguageRegistry::new();
        let created = registry
            .create(NewLanguage::new("dav", "Taita", Tier::Low))
            .await
            .unwrap();

        let updated = registry
            .update(
                created.id,
                LanguagePatch {
                    speaker_count: Some(340_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.code, "dav");
        assert_eq!(updated.name, "Taita");
        assert_eq!(updated.tier, Tier::Low);
        assert_eq!(updated.speaker_count, Some(340_000));
        assert!(updated.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_id() {
        let registry = LanguageRegistry::new();
        let err = registry.update(99, LanguagePatch::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let registry = LanguageRegistry::with_defaults().await;

        let filter = LanguageFilter {
            family: Some("Cushitic".into()),
            ..Default::default()
        };
        let (entries, total) = registry.list(&filter, Page::new(1, 2)).await;
        assert_eq!(total, 3);
        assert_eq!(entries.len(), 2);

        let (second_page, _) = registry.list(&filter, Page::new(2, 2)).await;
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].code, "elo");
    }

    #[tokio::test]
    async fn test_list_far_past_the_end_is_empty() {
        let registry = LanguageRegistry::with_defaults().await;

        let (entries, total) = registry
            .list(&LanguageFilter::default(), Page::new(usize::MAX / 2, 50))
            .await;
        assert!(entries.is_empty());
        assert_eq!(total, 15);

        let zeroth = Page { number: 0, size: 50 };
        assert_eq!(zeroth.offset(), 0);
    }

    #[tokio::test]
    async fn test_list_hides_inactive_unless_asked() {
        let registry = LanguageRegistry::with_defaults().await;
        let pokot = registry.resolve("pko").await.unwrap();
        registry.deactivate(pokot.id).await.unwrap();

        let endangered = LanguageFilter {
            status: Some(LanguageStatus::Endangered),
            ..Default::default()
        };
        let (_, total) = registry.list(&endangered, Page::default()).await;
        assert_eq!(total, 3);

        let with_inactive = LanguageFilter {
            include_inactive: true,
            ..endangered
        };
        let (_, total) = registry.list(&with_inactive, Page::default()).await;
        assert_eq!(total, 4);
    }
}
