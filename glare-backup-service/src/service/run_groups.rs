use crate::model::BackupPlan;
use crate::repo::plan::{PlanRepo, RunGroupSummary};
use crate::repo::RepoError;
use crate::service::retention::RetentionService;
use chrono::Utc;
use glare_common::model::{PlanId, RunGroupId};
use std::sync::Arc;
use tracing::{info, warn};

/// Finalizes a policy fire once every per-worker run of the group reached a
/// terminal state, then hands over to retention when the fire produced at
/// least one successful backup.
pub struct RunGroupService {
    plan_repo: Arc<dyn PlanRepo>,
    retention_service: Arc<RetentionService>,
}

impl RunGroupService {
    pub fn new(plan_repo: Arc<dyn PlanRepo>, retention_service: Arc<RetentionService>) -> Self {
        Self {
            plan_repo,
            retention_service,
        }
    }

    pub async fn finalize_if_complete(
        &self,
        plan_id: &PlanId,
        run_group_id: &RunGroupId,
    ) -> Result<Option<RunGroupSummary>, RepoError> {
        let summary = self
            .plan_repo
            .finalize_run_group(&plan_id.0, &run_group_id.0, Utc::now())
            .await?;

        let Some(summary) = summary else {
            return Ok(None);
        };

        info!(
            plan_id = %plan_id,
            run_group_id = %run_group_id,
            total = summary.total,
            success = summary.success,
            failure = summary.failure,
            "Run group finalized"
        );

        if summary.success > 0 {
            match self.plan_repo.get(&plan_id.0).await? {
                Some(record) => match BackupPlan::try_from(record) {
                    Ok(plan) if plan.prune && plan.retention.any_rule() => {
                        self.retention_service.execute(&plan).await;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(plan_id = %plan_id, "Skipping retention, plan row is invalid: {error}")
                    }
                },
                None => {}
            }
        }

        Ok(Some(summary))
    }
}
