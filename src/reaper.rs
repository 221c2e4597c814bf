//! Abandonment reaper — sweeps inactive flows to `abandoned`.
//!
//! Runs on a cron cadence. Each non-terminal status has its own inactivity
//! threshold (a respondent mid-form moves in minutes; one weighing curated
//! times may take a day). Idempotent: an already reaped flow is skipped, and
//! a lost version race means someone else just acted on the flow — also a
//! skip, never an error.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ReaperConfig;
use crate::error::{Error, FlowError};
use crate::flow::event::EventPayload;
use crate::flow::machine::FlowEngine;
use crate::flow::status::FlowStatus;

/// The abandonment reaper.
pub struct AbandonmentReaper {
    engine: Arc<FlowEngine>,
    config: ReaperConfig,
}

/// What one sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub reaped: usize,
    pub skipped_races: usize,
}

impl AbandonmentReaper {
    pub fn new(engine: Arc<FlowEngine>, config: ReaperConfig) -> Self {
        Self { engine, config }
    }

    /// Run one sweep over all non-terminal flows.
    ///
    /// Flows live in independent rows; per-flow failures are counted and the
    /// sweep keeps going.
    pub async fn sweep(&self) -> Result<SweepStats, Error> {
        let now = Utc::now();
        let flows = self.engine.store().list_active_flows().await?;
        let mut stats = SweepStats {
            scanned: flows.len(),
            ..SweepStats::default()
        };

        for flow in flows {
            let Some(threshold) = self.config.threshold_minutes(flow.status) else {
                continue;
            };
            let idle = flow.idle_minutes(now);
            if idle < threshold {
                continue;
            }

            match self
                .engine
                .transition(
                    flow.id,
                    FlowStatus::Abandoned,
                    EventPayload::Inactivity { idle_minutes: idle },
                )
                .await
            {
                Ok(_) => {
                    stats.reaped += 1;
                    debug!(flow_id = %flow.id, idle_minutes = idle, "Flow reaped");
                }
                // Someone acted on the flow between the scan and the commit,
                // or a parallel sweep got there first. Both mean the flow no
                // longer needs reaping.
                Err(Error::Flow(
                    FlowError::ConcurrentModification { .. }
                    | FlowError::FlowTerminated { .. }
                    | FlowError::InvalidTransition { .. },
                )) => {
                    stats.skipped_races += 1;
                }
                Err(e) => {
                    warn!(flow_id = %flow.id, error = %e, "Reaper failed on flow");
                }
            }
        }

        if stats.reaped > 0 {
            info!(reaped = stats.reaped, scanned = stats.scanned, "Abandonment sweep complete");
        }
        Ok(stats)
    }
}

/// Parse a cron expression and compute the next fire time from now.
pub fn next_sweep_at(schedule: &str) -> Result<Option<chrono::DateTime<Utc>>, String> {
    let cron_schedule =
        cron::Schedule::from_str(schedule).map_err(|e| format!("invalid cron: {e}"))?;
    Ok(cron_schedule.upcoming(Utc).next())
}

/// Spawn the sweep loop on the configured cron cadence.
pub fn spawn_reaper_task(reaper: AbandonmentReaper) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = match next_sweep_at(&reaper.config.schedule) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    warn!("Reaper cron schedule has no upcoming fire; reaper stopped");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Bad reaper cron schedule; reaper stopped");
                    return;
                }
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(e) = reaper.sweep().await {
                warn!(error = %e, "Abandonment sweep failed");
            }
        }
    })
}
