use std::sync::Arc;

use anyhow::Result;
use governance_service::{spawn_background_jobs, DecisionOutcome, GovernanceConfig, GovernancePipeline};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    tracing::info!("Starting strategy governance service");

    // 2. Configuration
    let config = GovernanceConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Strategies: {}", config.strategies.join(", "));
    tracing::info!(
        "  Auto-snapshot: {} (every {} decisions, min {}s apart)",
        config.auto_snapshot_enabled,
        config.decision_interval,
        config.min_seconds_between_snapshots
    );
    tracing::info!("  Alert cooldown: {}ms", config.cooldown_ms);

    // 3. Pipeline + background jobs
    let pipeline = Arc::new(GovernancePipeline::connect(config).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = spawn_background_jobs(Arc::clone(&pipeline), shutdown_rx);

    // 4. Decision intake: one JSON object per stdin line
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted: u64 = 0;
    let mut rejected: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("Decision input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<DecisionOutcome>(&line) {
                    Ok(outcome) => {
                        let receipt = pipeline.record_decision(&outcome).await;
                        if receipt.accepted {
                            accepted += 1;
                        } else {
                            rejected += 1;
                            tracing::debug!("Ignored decision for unknown strategy {}", outcome.strategy);
                        }
                    }
                    Err(e) => {
                        rejected += 1;
                        tracing::warn!("Skipping malformed decision line: {}", e);
                    }
                }
            }
        }
    }

    // 5. Shutdown: stop jobs, take a final snapshot and governance pass
    shutdown_tx.send(true).ok();
    for job in jobs {
        job.await.ok();
    }

    if accepted > 0 {
        if let Err(e) = pipeline.snapshot_now("shutdown").await {
            tracing::error!("Final snapshot failed: {}", e);
        }
        if let Err(e) = pipeline.run_governance_cycle().await {
            tracing::error!("Final governance cycle failed: {}", e);
        }
    }

    match pipeline.get_weights() {
        Ok(weights) => println!("{}", serde_json::to_string(&weights)?),
        Err(e) => tracing::error!("Could not compute final weights: {}", e),
    }

    tracing::info!(
        "Governance service stopped ({} decisions accepted, {} rejected)",
        accepted,
        rejected
    );
    Ok(())
}
