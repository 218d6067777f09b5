use crate::repo::user::UserRepo;
use crate::repo::RepoError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const SIGNUP_CACHE_TTL: Duration = Duration::from_secs(5);

/// Whether signup is open: true until the first user exists. The flag is read
/// on every landing-page load, so it is cached for a few seconds.
pub struct SignupStatusService {
    user_repo: Arc<dyn UserRepo>,
    cache: Mutex<Option<(Instant, bool)>>,
    ttl: Duration,
}

impl SignupStatusService {
    pub fn new(user_repo: Arc<dyn UserRepo>) -> Self {
        Self {
            user_repo,
            cache: Mutex::new(None),
            ttl: SIGNUP_CACHE_TTL,
        }
    }

    pub async fn signup_enabled(&self) -> Result<bool, RepoError> {
        let mut cache = self.cache.lock().await;
        if let Some((cached_at, enabled)) = *cache {
            if cached_at.elapsed() < self.ttl {
                return Ok(enabled);
            }
        }

        let enabled = self.user_repo.count().await? == 0;
        *cache = Some((Instant::now(), enabled));
        Ok(enabled)
    }
}
