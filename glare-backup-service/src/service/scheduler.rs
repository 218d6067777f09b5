use crate::model::BackupPlan;
use crate::repo::plan::PlanRepo;
use crate::repo::RepoError;
use crate::service::dispatcher::{Dispatcher, FireTrigger};
use crate::service::lease::LeaseManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Polls for due plans and fires them under the advisory lease. One loop per
/// replica; ticks never overlap and never crash the loop.
pub struct PlanScheduler {
    plan_repo: Arc<dyn PlanRepo>,
    lease_manager: Arc<LeaseManager>,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    tick_guard: Mutex<()>,
}

impl PlanScheduler {
    pub fn new(
        plan_repo: Arc<dyn PlanRepo>,
        lease_manager: Arc<LeaseManager>,
        dispatcher: Arc<Dispatcher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            plan_repo,
            lease_manager,
            dispatcher,
            poll_interval,
            tick_guard: Mutex::new(()),
        }
    }

    pub async fn run_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(err) = self.tick().await {
                // Transient database trouble; the next tick retries.
                error!("Scheduler tick failed: {err}");
            }
        }
    }

    pub async fn tick(&self) -> Result<(), RepoError> {
        // A tick that outlives the interval must not run concurrently with
        // the next one.
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("Skipping scheduler tick, previous tick still running");
            return Ok(());
        };

        let due = self.plan_repo.due(Utc::now()).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(count = due.len(), "Found due backup plans");

        for record in due {
            let plan = match BackupPlan::try_from(record) {
                Ok(plan) => plan,
                Err(err) => {
                    warn!("Skipping plan with invalid row: {err}");
                    continue;
                }
            };

            let fired = self
                .lease_manager
                .with_lease(&plan.id, self.dispatcher.fire(&plan, FireTrigger::Scheduled))
                .await?;

            match fired {
                None => debug!(plan_id = %plan.id, "Lease held elsewhere, skipping"),
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    error!(plan_id = %plan.id, "Dispatch failed: {err}");
                }
            }
        }

        Ok(())
    }
}
