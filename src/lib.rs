//! Translation resolution and model lifecycle for low-resource languages.
//!
//! Requests are answered from a translation cache or, on a miss, by the
//! model version currently promoted for the language pair. Ratings and
//! community corrections flow back into an append-only corpus, and that
//! corpus is periodically turned into new model versions by a staged
//! training pipeline. [`platform::Platform`] wires it all together.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod detection;
pub mod error;
pub mod feedback;
pub mod languages;
pub mod model;
pub mod platform;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod training;

pub use error::{ErrorKind, PipelineError, Result};
pub use platform::Platform;
