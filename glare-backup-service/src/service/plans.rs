use crate::cron::CronExpr;
use crate::model::{
    BackupPlan, BulkPlanAction, BulkPlanOutcome, BulkPlanRequest, BulkPlanResult,
};
use crate::repo::plan::PlanRepo;
use crate::repo::RepoError;
use crate::service::dispatcher::{Dispatcher, FireTrigger};
use crate::service::lease::LeaseManager;
use chrono::Utc;
use glare_common::model::{PlanId, UserId};
use glare_common::SafeDisplay;
use std::sync::Arc;
use tracing::error;

pub const MAX_BULK_IDS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum PlanServiceError {
    #[error("Plan not found")]
    NotFound,
    #[error("Plan is currently leased by another dispatcher")]
    LeaseConflict,
    #[error("Too many plan ids, at most {MAX_BULK_IDS} are allowed")]
    TooManyIds,
    #[error("Internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    InternalRepoError(#[from] RepoError),
}

impl SafeDisplay for PlanServiceError {
    fn to_safe_string(&self) -> String {
        match self {
            PlanServiceError::NotFound
            | PlanServiceError::LeaseConflict
            | PlanServiceError::TooManyIds => self.to_string(),
            PlanServiceError::Internal(_) => "Internal error".to_string(),
            PlanServiceError::InternalRepoError(inner) => inner.to_safe_string(),
        }
    }
}

/// Manual and bulk plan operations: run-now, trigger, pause, resume, delete.
pub struct PlanService {
    plan_repo: Arc<dyn PlanRepo>,
    lease_manager: Arc<LeaseManager>,
    dispatcher: Arc<Dispatcher>,
}

impl PlanService {
    pub fn new(
        plan_repo: Arc<dyn PlanRepo>,
        lease_manager: Arc<LeaseManager>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            plan_repo,
            lease_manager,
            dispatcher,
        }
    }

    /// Fires the plan out of schedule. Returns immediately once the fire is
    /// underway; a held lease is a conflict, not a queue.
    pub async fn run_now(
        &self,
        user_id: &UserId,
        plan_id: &PlanId,
    ) -> Result<(), PlanServiceError> {
        let plan = self.load_plan(user_id, plan_id).await?;
        self.spawn_fire(plan, FireTrigger::Manual).await
    }

    pub async fn bulk(
        &self,
        user_id: &UserId,
        request: &BulkPlanRequest,
    ) -> Result<Vec<BulkPlanResult>, PlanServiceError> {
        if request.plan_ids.len() > MAX_BULK_IDS {
            return Err(PlanServiceError::TooManyIds);
        }

        let mut results = Vec::with_capacity(request.plan_ids.len());
        for plan_id in &request.plan_ids {
            let outcome = self
                .apply_bulk_action(user_id, plan_id, request.action)
                .await?;
            results.push(BulkPlanResult {
                id: *plan_id,
                outcome,
            });
        }
        Ok(results)
    }

    async fn apply_bulk_action(
        &self,
        user_id: &UserId,
        plan_id: &PlanId,
        action: BulkPlanAction,
    ) -> Result<BulkPlanOutcome, PlanServiceError> {
        let plan = match self.load_plan(user_id, plan_id).await {
            Ok(plan) => plan,
            Err(PlanServiceError::NotFound) => return Ok(BulkPlanOutcome::NotFound),
            Err(other) => return Err(other),
        };

        match action {
            BulkPlanAction::Trigger => match self.spawn_fire(plan, FireTrigger::Bulk).await {
                Ok(()) => Ok(BulkPlanOutcome::Triggered),
                Err(PlanServiceError::LeaseConflict) => Ok(BulkPlanOutcome::Conflict),
                Err(other) => Err(other),
            },
            BulkPlanAction::Pause => {
                self.plan_repo.set_enabled(&plan_id.0, false, None).await?;
                Ok(BulkPlanOutcome::Paused)
            }
            BulkPlanAction::Resume => {
                let next_run_at = CronExpr::parse(&plan.cron)
                    .ok()
                    .and_then(|cron| cron.next_fire_after(Utc::now()).ok());
                match next_run_at {
                    Some(next_run_at) => {
                        self.plan_repo
                            .set_enabled(&plan_id.0, true, Some(next_run_at))
                            .await?;
                        Ok(BulkPlanOutcome::Resumed)
                    }
                    None => Ok(BulkPlanOutcome::Failed),
                }
            }
            BulkPlanAction::Delete => {
                self.plan_repo.delete(&plan_id.0).await?;
                Ok(BulkPlanOutcome::Deleted)
            }
        }
    }

    async fn load_plan(
        &self,
        user_id: &UserId,
        plan_id: &PlanId,
    ) -> Result<BackupPlan, PlanServiceError> {
        let record = self
            .plan_repo
            .get_for_user(&user_id.0, &plan_id.0)
            .await?
            .ok_or(PlanServiceError::NotFound)?;
        BackupPlan::try_from(record).map_err(PlanServiceError::Internal)
    }

    /// Takes the lease synchronously (so conflicts surface as 409) and runs
    /// the fire in the background, releasing the lease when it settles.
    async fn spawn_fire(
        &self,
        plan: BackupPlan,
        trigger: FireTrigger,
    ) -> Result<(), PlanServiceError> {
        if !self.lease_manager.acquire(&plan.id).await? {
            return Err(PlanServiceError::LeaseConflict);
        }

        let dispatcher = self.dispatcher.clone();
        let lease_manager = self.lease_manager.clone();
        tokio::spawn(async move {
            let plan_id = plan.id;
            if let Err(err) = dispatcher.fire(&plan, trigger).await {
                error!(plan_id = %plan_id, "Manual fire failed: {err}");
            }
            if let Err(err) = lease_manager.release(&plan_id).await {
                error!(plan_id = %plan_id, "Failed to release lease after manual fire: {err}");
            }
        });

        Ok(())
    }
}
