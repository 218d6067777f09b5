use crate::model::{BackupRun, RunMetric};
use crate::repo::metrics::MetricsRepo;
use crate::repo::RepoError;
use crate::service::anomaly::SizeAnomalyService;
use crate::service::snapshots::extract_summary;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// The shared success pipeline: storage growth sample, metric row, anomaly
/// check. Push completion, pull completion and the reconciliation sweeper all
/// go through here so the persisted state is identical regardless of how the
/// outcome arrived.
pub struct RunOutcomeService {
    metrics_repo: Arc<dyn MetricsRepo>,
    anomaly_service: Arc<SizeAnomalyService>,
}

impl RunOutcomeService {
    pub fn new(
        metrics_repo: Arc<dyn MetricsRepo>,
        anomaly_service: Arc<SizeAnomalyService>,
    ) -> Self {
        Self {
            metrics_repo,
            anomaly_service,
        }
    }

    pub async fn record_success(&self, run: &BackupRun) -> Result<(), RepoError> {
        let summary = run
            .output
            .as_ref()
            .map(extract_summary)
            .unwrap_or_default();
        let bytes_added = summary.bytes_added.unwrap_or(0);
        let now = Utc::now();

        self.metrics_repo
            .record_storage_sample(
                &run.user_id.0,
                &run.id.0,
                &run.repository_id.0,
                bytes_added,
                now,
            )
            .await?;

        let metric = RunMetric {
            id: Uuid::new_v4(),
            run_id: run.id,
            user_id: run.user_id,
            plan_id: Some(run.plan_id),
            repository_id: run.repository_id,
            snapshot_id: run.snapshot_id.clone(),
            bytes_added,
            bytes_processed: summary.bytes_processed,
            files_new: summary.files_new,
            files_changed: summary.files_changed,
            files_unmodified: summary.files_unmodified,
            created_at: now,
        };
        self.metrics_repo
            .insert_metric(&metric.clone().into())
            .await?;

        self.anomaly_service.evaluate(&metric).await?;
        Ok(())
    }
}
