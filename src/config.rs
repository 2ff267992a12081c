use anyhow::{Context, Result};
use std::path::PathBuf;

/// Which modeling backend trains and serves models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process phrase table
    Dictionary,
    /// External model server speaking JSON over HTTP
    Remote { base_url: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    // Modeling backend
    pub backend: BackendKind,
    pub inference_max_attempts: u32,
    /// Per-request timeout for the remote backend
    pub model_request_timeout_secs: u64,

    // Training
    pub training_epochs: u32,
    pub training_eval_ratio: f64,
    pub training_max_tokens: usize,
    /// Daily run times, "HH:MM" in UTC
    pub training_schedule: Vec<String>,
    /// Promote a staged version automatically when its exact-match rate
    /// reaches this threshold
    pub auto_promote_min_exact_match: Option<f64>,

    // Feedback
    pub confidence_decay: f64,

    // Corpus seeding
    pub corpus_seed_dir: PathBuf,
    pub seed_auto_approve: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Dictionary,
            inference_max_attempts: 2,
            model_request_timeout_secs: 30,
            training_epochs: 3,
            training_eval_ratio: 0.2,
            training_max_tokens: 128,
            training_schedule: vec!["02:00".to_string()],
            auto_promote_min_exact_match: None,
            confidence_decay: 0.8,
            corpus_seed_dir: PathBuf::from("data"),
            seed_auto_approve: true,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, value, e)),
        _ => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let backend = match std::env::var("MODEL_BACKEND")
            .unwrap_or_else(|_| "dictionary".to_string())
            .as_str()
        {
            "dictionary" => BackendKind::Dictionary,
            "remote" => BackendKind::Remote {
                base_url: std::env::var("MODEL_BACKEND_URL")
                    .context("MODEL_BACKEND_URL not set (required for MODEL_BACKEND=remote)")?,
            },
            other => anyhow::bail!(
                "Unknown MODEL_BACKEND '{}'. Expected 'dictionary' or 'remote'",
                other
            ),
        };

        let training_eval_ratio: f64 =
            parse_var("TRAINING_EVAL_RATIO")?.unwrap_or(defaults.training_eval_ratio);
        if !(0.0..1.0).contains(&training_eval_ratio) {
            anyhow::bail!(
                "TRAINING_EVAL_RATIO must be in [0, 1), got {}",
                training_eval_ratio
            );
        }

        let model_request_timeout_secs: u64 = parse_var("MODEL_REQUEST_TIMEOUT_SECS")?
            .unwrap_or(defaults.model_request_timeout_secs);
        if model_request_timeout_secs == 0 {
            anyhow::bail!("MODEL_REQUEST_TIMEOUT_SECS must be at least 1");
        }

        let confidence_decay: f64 =
            parse_var("CONFIDENCE_DECAY")?.unwrap_or(defaults.confidence_decay);
        if !(0.0..=1.0).contains(&confidence_decay) {
            anyhow::bail!("CONFIDENCE_DECAY must be in [0, 1], got {}", confidence_decay);
        }

        let training_schedule = match std::env::var("TRAINING_SCHEDULE") {
            Ok(value) => value
                .split(',')
                .map(|time| time.trim().to_string())
                .filter(|time| !time.is_empty())
                .collect(),
            Err(_) => defaults.training_schedule,
        };

        Ok(Self {
            backend,
            inference_max_attempts: parse_var("INFERENCE_MAX_ATTEMPTS")?
                .unwrap_or(defaults.inference_max_attempts),
            model_request_timeout_secs,

            training_epochs: parse_var("TRAINING_EPOCHS")?.unwrap_or(defaults.training_epochs),
            training_eval_ratio,
            training_max_tokens: parse_var("TRAINING_MAX_TOKENS")?
                .unwrap_or(defaults.training_max_tokens),
            training_schedule,
            auto_promote_min_exact_match: parse_var("AUTO_PROMOTE_MIN_EXACT_MATCH")?,

            confidence_decay,

            corpus_seed_dir: std::env::var("CORPUS_SEED_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.corpus_seed_dir),
            seed_auto_approve: parse_var("SEED_AUTO_APPROVE")?
                .unwrap_or(defaults.seed_auto_approve),
        })
    }

    pub fn training(&self) -> crate::training::TrainingConfig {
        crate::training::TrainingConfig {
            epochs: self.training_epochs,
            eval_ratio: self.training_eval_ratio,
            max_tokens: self.training_max_tokens,
        }
    }
}
