use glare_common::SafeDisplay;

pub mod event;
pub mod metrics;
pub mod plan;
pub mod repository;
pub mod run;
pub mod user;
pub mod worker;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Database error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(error: sqlx::Error) -> Self {
        RepoError::Internal(error.to_string())
    }
}

impl SafeDisplay for RepoError {
    fn to_safe_string(&self) -> String {
        // Driver messages may embed connection details; never show them.
        "Internal repository error".to_string()
    }
}
