//! Language entry types: tiers, endangerment status, patches and filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource-availability tier guiding how much collection and training effort
/// a language gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    /// Tier 1: high-resource
    High,
    /// Tier 2: medium-resource
    Medium,
    /// Tier 3: low-resource or endangered
    Low,
}

impl Tier {
    pub fn number(self) -> u8 {
        match self {
            Tier::High => 1,
            Tier::Medium => 2,
            Tier::Low => 3,
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tier::High),
            2 => Ok(Tier::Medium),
            3 => Ok(Tier::Low),
            other => Err(format!("tier must be 1, 2 or 3, got {}", other)),
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.number()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.number())
    }
}

/// Vitality of a language, independent of whether we serve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageStatus {
    Active,
    Endangered,
    CriticallyEndangered,
    Extinct,
}

/// A registered language.
///
/// `code` never changes after creation: corpus records, cache entries and
/// model scopes refer to languages by code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub id: u32,
    pub code: String,
    pub name: String,
    pub family: Option<String>,
    pub tier: Tier,
    pub status: LanguageStatus,
    pub speaker_count: Option<u64>,
    pub orthography_notes: Option<String>,
    pub cultural_context: Option<String>,
    /// Soft-delete flag; inactive languages are not servable
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payload for [`LanguageRegistry::create`](super::LanguageRegistry::create).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLanguage {
    pub code: String,
    pub name: String,
    pub family: Option<String>,
    pub tier: Tier,
    pub status: LanguageStatus,
    pub speaker_count: Option<u64>,
    pub orthography_notes: Option<String>,
    pub cultural_context: Option<String>,
}

impl NewLanguage {
    /// Minimal constructor; optional metadata can be set on the returned value.
    pub fn new(code: &str, name: &str, tier: Tier) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            family: None,
            tier,
            status: LanguageStatus::Active,
            speaker_count: None,
            orthography_notes: None,
            cultural_context: None,
        }
    }
}

/// Partial update. Only `Some` fields are applied; the code is deliberately
/// absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguagePatch {
    pub name: Option<String>,
    pub family: Option<String>,
    pub tier: Option<Tier>,
    pub status: Option<LanguageStatus>,
    pub speaker_count: Option<u64>,
    pub orthography_notes: Option<String>,
    pub cultural_context: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct LanguageFilter {
    pub tier: Option<Tier>,
    pub status: Option<LanguageStatus>,
    pub family: Option<String>,
    /// Also return soft-deleted entries
    pub include_inactive: bool,
}

impl LanguageFilter {
    pub fn matches(&self, entry: &LanguageEntry) -> bool {
        (self.include_inactive || entry.active)
            && self.tier.map_or(true, |tier| entry.tier == tier)
            && self.status.map_or(true, |status| entry.status == status)
            && self
                .family
                .as_deref()
                .map_or(true, |family| entry.family.as_deref() == Some(family))
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Self {
            number: number.max(1),
            size: size.max(1),
        }
    }

    /// Saturates, so a page far past the end is simply empty.
    pub fn offset(&self) -> usize {
        self.number.saturating_sub(1).saturating_mul(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_number() {
        assert_eq!(Tier::try_from(1), Ok(Tier::High));
        assert_eq!(Tier::try_from(3), Ok(Tier::Low));
        assert!(Tier::try_from(0).is_err());
        assert!(Tier::try_from(4).is_err());
    }

    #[test]
    fn test_tier_serializes_as_number() {
        let json = serde_json::to_string(&Tier::Medium).unwrap();
        assert_eq!(json, "2");
        let tier: Tier = serde_json::from_str("3").unwrap();
        assert_eq!(tier, Tier::Low);
        assert!(serde_json::from_str::<Tier>("9").is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&LanguageStatus::CriticallyEndangered).unwrap();
        assert_eq!(json, "\"critically_endangered\"");
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(Page::default().offset(), 0);
        assert_eq!(Page::new(3, 10).offset(), 20);
        // Page 0 is clamped to the first page
        assert_eq!(Page::new(0, 10).offset(), 0);
    }
}
