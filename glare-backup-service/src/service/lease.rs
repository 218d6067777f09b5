use crate::repo::plan::PlanRepo;
use crate::repo::RepoError;
use chrono::Utc;
use glare_common::model::PlanId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(120);

/// A stable per-replica identity, generated once at startup.
pub fn generate_owner_id() -> String {
    let host = gethostname::gethostname().to_string_lossy().to_string();
    let nonce: [u8; 4] = rand::random();
    format!("{host}-{}-{}", std::process::id(), hex::encode(nonce))
}

/// Advisory, TTL-bounded exclusive right to dispatch a plan, stored on the
/// plan row itself. Cooperative only: replicas that crash mid-fire simply let
/// the lease expire.
pub struct LeaseManager {
    plan_repo: Arc<dyn PlanRepo>,
    owner: String,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(plan_repo: Arc<dyn PlanRepo>, owner: String, ttl: Duration) -> Self {
        Self {
            plan_repo,
            owner,
            ttl,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Reentrant for the same owner.
    pub async fn acquire(&self, plan_id: &PlanId) -> Result<bool, RepoError> {
        let now = Utc::now();
        let until = now
            + chrono::Duration::from_std(self.ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));
        self.plan_repo
            .try_acquire_lease(&plan_id.0, &self.owner, until, now)
            .await
    }

    pub async fn release(&self, plan_id: &PlanId) -> Result<(), RepoError> {
        self.plan_repo.release_lease(&plan_id.0, &self.owner).await
    }

    /// Runs `work` under the lease, releasing it on every exit path. Returns
    /// `None` when the lease is held by another owner.
    pub async fn with_lease<T, F>(&self, plan_id: &PlanId, work: F) -> Result<Option<T>, RepoError>
    where
        F: Future<Output = T>,
    {
        if !self.acquire(plan_id).await? {
            return Ok(None);
        }

        let result = work.await;

        if let Err(error) = self.release(plan_id).await {
            // The TTL bounds a leaked lease; the next tick recovers.
            warn!(plan_id = %plan_id, "Failed to release plan lease: {error}");
        }

        Ok(Some(result))
    }
}
