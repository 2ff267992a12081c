use anyhow::Result;
use lugha_pipeline::config::Config;
use lugha_pipeline::platform::Platform;
use lugha_pipeline::scheduler;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lugha_pipeline=info".parse()?),
        )
        .init();

    info!("Starting translation pipeline");

    // Load configuration from environment
    let config = Config::from_env()?;
    info!("Model backend: {:?}", config.backend);

    let platform = Arc::new(Platform::from_config(config).await);
    let (languages, total) = platform
        .languages()
        .list(&Default::default(), Default::default())
        .await;
    info!("Language registry ready ({} of {} shown)", languages.len(), total);

    // Seed the corpus from collected data
    let seed_dir = platform.config().corpus_seed_dir.clone();
    if seed_dir.is_dir() {
        platform.import_corpus_dir(&seed_dir).await?;
    } else {
        warn!("Corpus seed directory {} not found, starting empty", seed_dir.display());
    }

    // First training cycle right away so there is something to serve
    let policy = platform
        .config()
        .auto_promote_min_exact_match
        .map(|min_exact_match| scheduler::PromotionPolicy { min_exact_match });
    let outcomes = scheduler::run_training_cycle(&platform, policy).await;
    info!("Initial training cycle trained {} scopes", outcomes.len());

    let mut job_scheduler = scheduler::start_scheduler(Arc::clone(&platform)).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    job_scheduler.shutdown().await?;
    platform.analytics().flush().await;

    let report = platform.metrics();
    info!(
        "Served {} requests ({:.1}% cache hits, {} failures)",
        report.total_requests, report.cache_hit_rate, report.failures
    );
    Ok(())
}
