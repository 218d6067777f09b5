use crate::model::{BackupRequest, ForgetRequest, Worker};
use async_trait::async_trait;
use glare_common::SafeDisplay;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Hard deadline on every outward worker call.
pub const WORKER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum WorkerCallError {
    #[error("Worker unreachable: {0}")]
    Unreachable(String),
    #[error("Worker has no endpoint")]
    MissingEndpoint,
    #[error("Worker has no sync token")]
    MissingToken,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SafeDisplay for WorkerCallError {
    fn to_safe_string(&self) -> String {
        match self {
            // reqwest errors render the URL but never credentials
            WorkerCallError::Unreachable(_) => self.to_string(),
            WorkerCallError::MissingEndpoint | WorkerCallError::MissingToken => self.to_string(),
            WorkerCallError::Internal(_) => "Internal error".to_string(),
        }
    }
}

/// One worker HTTP verb; GET verbs take no body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerVerb {
    Init,
    Backup,
    Forget,
    Check,
    RepairIndex,
    Restore,
    RepositorySnapshots,
    SnapshotFiles,
    RcloneSize,
    LsDirs,
    Version,
    Snapshots,
    Stats,
}

impl WorkerVerb {
    pub fn path(&self) -> &'static str {
        match self {
            WorkerVerb::Init => "/rustic/init",
            WorkerVerb::Backup => "/rustic/backup",
            WorkerVerb::Forget => "/rustic/forget",
            WorkerVerb::Check => "/rustic/check",
            WorkerVerb::RepairIndex => "/rustic/repair-index",
            WorkerVerb::Restore => "/rustic/restore",
            WorkerVerb::RepositorySnapshots => "/rustic/repository-snapshots",
            WorkerVerb::SnapshotFiles => "/rustic/snapshot/files",
            WorkerVerb::RcloneSize => "/rustic/rclone-size",
            WorkerVerb::LsDirs => "/rustic/ls-dirs",
            WorkerVerb::Version => "/rustic/version",
            WorkerVerb::Snapshots => "/rustic/snapshots",
            WorkerVerb::Stats => "/rustic/stats",
        }
    }

    pub fn is_get(&self) -> bool {
        matches!(
            self,
            WorkerVerb::Version | WorkerVerb::Snapshots | WorkerVerb::Stats
        )
    }
}

/// The repository half of a worker request, shared by the maintenance verbs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryTargetRequest {
    pub backend: String,
    pub options: BTreeMap<String, String>,
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerCallOutcome {
    pub http_status: u16,
    pub body: Value,
}

impl WorkerCallOutcome {
    /// `rustic.success` decides when present, otherwise the HTTP status.
    pub fn success(&self) -> bool {
        match self.body.pointer("/rustic/success") {
            Some(Value::Bool(success)) => *success,
            _ => (200..300).contains(&self.http_status),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.body
            .get("error")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }
}

#[async_trait]
pub trait WorkerApi: Send + Sync {
    async fn call(
        &self,
        worker: &Worker,
        verb: WorkerVerb,
        body: Value,
    ) -> Result<WorkerCallOutcome, WorkerCallError>;

    async fn backup(
        &self,
        worker: &Worker,
        request: &BackupRequest,
    ) -> Result<WorkerCallOutcome, WorkerCallError> {
        let body =
            serde_json::to_value(request).map_err(|e| WorkerCallError::Internal(e.to_string()))?;
        self.call(worker, WorkerVerb::Backup, body).await
    }

    async fn forget(
        &self,
        worker: &Worker,
        request: &ForgetRequest,
    ) -> Result<WorkerCallOutcome, WorkerCallError> {
        let body =
            serde_json::to_value(request).map_err(|e| WorkerCallError::Internal(e.to_string()))?;
        self.call(worker, WorkerVerb::Forget, body).await
    }

    async fn repository_snapshots(
        &self,
        worker: &Worker,
        request: &RepositoryTargetRequest,
    ) -> Result<WorkerCallOutcome, WorkerCallError> {
        let body =
            serde_json::to_value(request).map_err(|e| WorkerCallError::Internal(e.to_string()))?;
        self.call(worker, WorkerVerb::RepositorySnapshots, body).await
    }
}

/// The reqwest-backed client used in production.
pub struct RusticWorkerClient {
    http: reqwest::Client,
}

impl RusticWorkerClient {
    pub fn new() -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(WORKER_CALL_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to build worker HTTP client: {e}"))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl WorkerApi for RusticWorkerClient {
    async fn call(
        &self,
        worker: &Worker,
        verb: WorkerVerb,
        body: Value,
    ) -> Result<WorkerCallOutcome, WorkerCallError> {
        let endpoint = worker
            .endpoint
            .as_deref()
            .ok_or(WorkerCallError::MissingEndpoint)?;
        let token = worker
            .sync_token
            .as_ref()
            .ok_or(WorkerCallError::MissingToken)?;

        let url = format!("{}{}", endpoint.trim_end_matches('/'), verb.path());

        let request = if verb.is_get() {
            self.http.get(&url)
        } else {
            self.http.post(&url).json(&body)
        };

        let response = request
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|e| WorkerCallError::Unreachable(e.without_url().to_string()))?;

        let http_status = response.status().as_u16();
        // Non-JSON bodies are tolerated; success then rides on the status.
        let body = response.json::<Value>().await.unwrap_or(Value::Null);

        Ok(WorkerCallOutcome { http_status, body })
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;
    use serde_json::json;

    fn outcome(http_status: u16, body: Value) -> WorkerCallOutcome {
        WorkerCallOutcome { http_status, body }
    }

    #[test]
    fn rustic_success_flag_wins_over_http_status() {
        assert!(!outcome(200, json!({ "rustic": { "success": false } })).success());
        assert!(outcome(500, json!({ "rustic": { "success": true } })).success());
    }

    #[test]
    fn http_status_decides_without_a_rustic_flag() {
        assert!(outcome(204, Value::Null).success());
        assert!(!outcome(500, json!({ "error": "boom" })).success());
    }

    #[test]
    fn error_message_is_taken_from_the_body() {
        assert_eq!(
            outcome(500, json!({ "error": "repo locked" })).error_message(),
            Some("repo locked".to_string())
        );
        assert_eq!(outcome(500, Value::Null).error_message(), None);
    }
}
