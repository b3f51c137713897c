use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::relay_engine::RelayEngine;

/// Periodic antispam sweep and permission audit. Runs until `cancel` fires.
///
/// Start it only after [`RelayEngine::reconcile`] so the audit never looks at
/// channels that are about to be pruned.
pub fn spawn_housekeeping(engine: Arc<RelayEngine>, cancel: CancellationToken) -> JoinHandle<()> {
    let sweep_every = Duration::from_secs(engine.config().antispam.sweep_interval_secs);
    let audit_every =
        Duration::from_secs(engine.config().moderation.permission_audit_interval_secs);
    spawn_with_intervals(engine, cancel, sweep_every, audit_every)
}

fn spawn_with_intervals(
    engine: Arc<RelayEngine>,
    cancel: CancellationToken,
    sweep_every: Duration,
    audit_every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            sweep_secs = sweep_every.as_secs(),
            audit_secs = audit_every.as_secs(),
            "housekeeping started"
        );

        let mut sweep = time::interval(sweep_every);
        let mut audit = time::interval(audit_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        audit.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        sweep.tick().await;
        audit.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    engine.sweep_antispam();
                }
                _ = audit.tick() => {
                    engine.audit_permissions().await;
                }
            }
        }
        info!("housekeeping stopped");
    })
}
