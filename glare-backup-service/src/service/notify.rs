use crate::model::{Worker, WorkerStatus};
use async_trait::async_trait;
use tracing::{info, warn};

/// Seam towards the notifications collaborator. Delivery is best-effort:
/// implementations swallow and log their own failures.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn worker_health(&self, worker: &Worker, previous: WorkerStatus, current: WorkerStatus);
}

/// Default implementation: structured log lines only.
pub struct LoggedNotificationService;

#[async_trait]
impl NotificationService for LoggedNotificationService {
    async fn worker_health(&self, worker: &Worker, previous: WorkerStatus, current: WorkerStatus) {
        match current {
            WorkerStatus::Degraded | WorkerStatus::Offline => {
                warn!(
                    worker_id = %worker.id,
                    worker_name = %worker.name,
                    %previous,
                    %current,
                    "Worker health changed"
                );
            }
            WorkerStatus::Online => {
                info!(
                    worker_id = %worker.id,
                    worker_name = %worker.name,
                    %previous,
                    %current,
                    "Worker health recovered"
                );
            }
        }
    }
}
