//! Periodic purge and governance evaluation with jittered intervals.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::pipeline::GovernancePipeline;

/// `base` scaled by a random factor in [1 - jitter_pct, 1 + jitter_pct].
pub fn jittered<R: Rng>(base: Duration, jitter_pct: f64, rng: &mut R) -> Duration {
    let jitter = jitter_pct.clamp(0.0, 0.99);
    if jitter == 0.0 {
        return base;
    }
    let factor = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
    base.mul_f64(factor)
}

/// Start the purge and evaluation loops. Both stop once `shutdown` flips to true.
pub fn spawn_background_jobs(
    pipeline: Arc<GovernancePipeline>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let config = pipeline.config().clone();
    let mut handles = Vec::new();

    if config.purge_days.is_some() {
        let pipeline = Arc::clone(&pipeline);
        handles.push(spawn_loop(
            "snapshot-purge",
            Duration::from_secs(config.purge_interval_secs),
            config.job_jitter_pct,
            shutdown.clone(),
            move || {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    match pipeline.purge().await {
                        Ok(Some(result)) => tracing::debug!(
                            "Purge job removed {} snapshot rows, {} alerts, {} detections",
                            result.snapshots.removed,
                            result.alerts.alerts,
                            result.alerts.detections
                        ),
                        Ok(None) => {}
                        Err(e) => tracing::error!("Purge job failed: {}", e),
                    }
                }
            },
        ));
    }

    let pipeline = Arc::clone(&pipeline);
    handles.push(spawn_loop(
        "governance-evaluation",
        Duration::from_secs(config.evaluation_interval_secs),
        config.job_jitter_pct,
        shutdown,
        move || {
            let pipeline = Arc::clone(&pipeline);
            async move {
                if let Err(e) = pipeline.run_governance_cycle().await {
                    tracing::error!("Governance evaluation job failed: {}", e);
                }
            }
        },
    ));

    handles
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    base: Duration,
    jitter_pct: f64,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        tracing::debug!("Background job {} started", name);

        loop {
            let delay = jittered(base, jitter_pct, &mut rng);
            tokio::select! {
                _ = tokio::time::sleep(delay) => job().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Background job {} stopped", name);
    })
}
