use crate::languages::Tier;
use crate::model::{EvaluationMetrics, Scope};
use crate::platform::Platform;
use crate::training::RunStage;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Gate for promoting a freshly staged version without a human.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromotionPolicy {
    pub min_exact_match: f64,
}

impl PromotionPolicy {
    /// The candidate must reach the threshold and must not be worse than the
    /// version currently serving the scope.
    pub fn allows(&self, candidate: &EvaluationMetrics, current: Option<&EvaluationMetrics>) -> bool {
        if candidate.exact_match < self.min_exact_match {
            return false;
        }
        match current {
            Some(current) => candidate.exact_match >= current.exact_match,
            None => true,
        }
    }
}

/// What one scheduled cycle did for one scope.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub scope: Scope,
    pub run_id: Option<u64>,
    pub state: Option<RunStage>,
    pub promoted: Option<String>,
    pub error: Option<String>,
}

fn tier_weight(tier: Tier) -> u64 {
    match tier {
        Tier::High => 3,
        Tier::Medium => 2,
        Tier::Low => 1,
    }
}

/// Pair scopes worth training now, most urgent first.
///
/// A pair qualifies when it has approved data whose snapshot no earlier run
/// has used. Urgency is the analytics demand for the pair (every request,
/// with failures counted twice) weighted by the lower-priority tier of its
/// two languages.
pub async fn plan_scopes(platform: &Platform) -> Vec<Scope> {
    let demand = platform.analytics().pair_stats().await;
    let mut planned: Vec<(u64, Scope)> = Vec::new();

    for (source, target) in platform.corpus().approved_pairs().await.into_keys() {
        let (source_entry, target_entry) =
            match platform.languages().require_pair(&source, &target).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Not planning {}->{}: {}", source, target, e);
                    continue;
                }
            };

        let scope = Scope::pair(&source, &target);
        let snapshot = platform.corpus().snapshot(&scope).await;
        let used: HashSet<String> = platform
            .training()
            .runs_for(&scope)
            .await
            .into_iter()
            .filter_map(|run| run.snapshot_id)
            .collect();
        if used.contains(&snapshot.id) {
            continue;
        }

        let weight = tier_weight(source_entry.tier).min(tier_weight(target_entry.tier));
        let requests = demand
            .get(&(source.clone(), target.clone()))
            .map(|stats| (stats.requests + stats.failures) as u64)
            .unwrap_or(0);
        planned.push((weight * (1 + requests), scope));
    }

    planned.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    planned.into_iter().map(|(_, scope)| scope).collect()
}

async fn train_scope(platform: &Platform, scope: Scope, policy: Option<PromotionPolicy>) -> CycleOutcome {
    let mut outcome = CycleOutcome {
        scope: scope.clone(),
        run_id: None,
        state: None,
        promoted: None,
        error: None,
    };

    let run = match platform.train(scope.clone()).await {
        Ok(run) => run,
        Err(e) => {
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };
    outcome.run_id = Some(run.id);
    outcome.state = Some(run.state);

    let version_id = match run.outcome() {
        Ok(version_id) => version_id.to_string(),
        Err(e) => {
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };
    let (Some(policy), Some(candidate)) = (policy, run.evaluation.as_ref()) else {
        info!("{} staged for {}, awaiting manual promotion", version_id, scope);
        return outcome;
    };

    let current = platform.models().get_active(&scope).await.ok();
    let current_metrics = current.as_ref().and_then(|version| version.evaluation_metrics.as_ref());
    if !policy.allows(candidate, current_metrics) {
        info!(
            "{} not promoted: exact match {:.2} (threshold {:.2})",
            version_id, candidate.exact_match, policy.min_exact_match
        );
        return outcome;
    }

    match platform.promote(&version_id).await {
        Ok(version) => outcome.promoted = Some(version.id),
        Err(e) => outcome.error = Some(e.to_string()),
    }
    outcome
}

/// Plan, train every planned scope concurrently and apply the promotion
/// policy to the results.
pub async fn run_training_cycle(platform: &Platform, policy: Option<PromotionPolicy>) -> Vec<CycleOutcome> {
    let scopes = plan_scopes(platform).await;
    if scopes.is_empty() {
        info!("No scopes with new approved data, nothing to train");
        return Vec::new();
    }
    info!("Training cycle planned {} scopes", scopes.len());

    let outcomes = futures::future::join_all(
        scopes
            .into_iter()
            .map(|scope| train_scope(platform, scope, policy)),
    )
    .await;

    for outcome in &outcomes {
        if let Some(e) = &outcome.error {
            warn!("Training cycle for {}: {}", outcome.scope, e);
        }
    }
    outcomes
}

/// Initialize and start the scheduler
pub async fn start_scheduler(platform: Arc<Platform>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let policy = platform
        .config()
        .auto_promote_min_exact_match
        .map(|min_exact_match| PromotionPolicy { min_exact_match });

    for time in &platform.config().training_schedule {
        let cron_expr = time_to_cron(time)?;
        info!("Scheduling training cycle for {} UTC (cron: {})", time, cron_expr);

        let platform_clone = Arc::clone(&platform);
        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
            let platform = Arc::clone(&platform_clone);

            Box::pin(async move {
                info!("Scheduled training cycle triggered");
                let outcomes = run_training_cycle(&platform, policy).await;
                let promoted = outcomes.iter().filter(|o| o.promoted.is_some()).count();
                let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
                if failed > 0 {
                    error!("Training cycle finished with {} failed scopes", failed);
                }
                info!(
                    "Training cycle done: {} scopes, {} promoted",
                    outcomes.len(),
                    promoted
                );
            })
        })?;

        scheduler.add(job).await?;
    }

    scheduler.start().await?;
    info!("✓ Scheduler started");

    Ok(scheduler)
}

/// Convert time string (HH:MM, UTC) to a daily cron expression
fn time_to_cron(time: &str) -> Result<String> {
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 2 {
        anyhow::bail!("Invalid time format: {}. Expected HH:MM", time);
    }

    let hour: u8 = parts[0].parse()?;
    let minute: u8 = parts[1].parse()?;
    if hour > 23 || minute > 59 {
        anyhow::bail!("Invalid time: {}. Hour must be 0-23 and minute 0-59", time);
    }

    // Cron format: "second minute hour day month day_of_week"
    Ok(format!("0 {} {} * * *", minute, hour))
}
