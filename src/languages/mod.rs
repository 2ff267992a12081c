//! Language registry module.
//!
//! # Architecture
//!
//! - `entry`: language metadata types (tier, status, patch, filter, page)
//! - `registry`: the registry itself and the default language set
//! - `context`: cultural notes for individual phrases
//!
//! # Example
//!
//! ```rust,ignore
//! use lugha_pipeline::languages::{LanguageRegistry, Tier};
//!
//! let registry = LanguageRegistry::with_defaults().await;
//! let swahili = registry.require_active("sw").await?;
//! let endangered = registry.list_by_tier(Tier::Low).await;
//! ```

mod context;
mod entry;
mod registry;

pub use context::{default_notes, CulturalContext, CulturalNote};
pub use entry::{LanguageEntry, LanguageFilter, LanguagePatch, LanguageStatus, NewLanguage, Page, Tier};
pub use registry::{default_languages, LanguageRegistry};
