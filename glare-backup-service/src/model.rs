use chrono::{DateTime, Utc};
use glare_common::model::{
    PlanId, RepositoryId, RunGroupId, RunId, TokenSecret, UserId, WorkerId,
};
use poem_openapi::{Enum, Object};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// A worker is considered online while its last heartbeat is younger than this.
pub const WORKER_ONLINE_WINDOW_SECONDS: i64 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Degraded,
    Offline,
}

impl Display for WorkerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Online => write!(f, "online"),
            WorkerStatus::Degraded => write!(f, "degraded"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(WorkerStatus::Online),
            "degraded" => Ok(WorkerStatus::Degraded),
            "offline" => Ok(WorkerStatus::Offline),
            _ => Err(format!("Invalid worker status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryBackend {
    Local,
    S3,
    B2,
    Rclone,
    Sftp,
    Webdav,
    Rest,
}

impl Display for RepositoryBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryBackend::Local => write!(f, "local"),
            RepositoryBackend::S3 => write!(f, "s3"),
            RepositoryBackend::B2 => write!(f, "b2"),
            RepositoryBackend::Rclone => write!(f, "rclone"),
            RepositoryBackend::Sftp => write!(f, "sftp"),
            RepositoryBackend::Webdav => write!(f, "webdav"),
            RepositoryBackend::Rest => write!(f, "rest"),
        }
    }
}

impl FromStr for RepositoryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(RepositoryBackend::Local),
            "s3" => Ok(RepositoryBackend::S3),
            "b2" => Ok(RepositoryBackend::B2),
            "rclone" => Ok(RepositoryBackend::Rclone),
            "sftp" => Ok(RepositoryBackend::Sftp),
            "webdav" => Ok(RepositoryBackend::Webdav),
            "rest" => Ok(RepositoryBackend::Rest),
            _ => Err(format!("Invalid repository backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Running,
    Success,
    Failed,
}

impl Display for PlanStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Running => write!(f, "running"),
            PlanStatus::Success => write!(f, "success"),
            PlanStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(PlanStatus::Running),
            "success" => Ok(PlanStatus::Success),
            "failed" => Ok(PlanStatus::Failed),
            _ => Err(format!("Invalid plan status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Backup,
    Prune,
}

impl Display for RunType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RunType::Backup => write!(f, "backup"),
            RunType::Prune => write!(f, "prune"),
        }
    }
}

impl FromStr for RunType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backup" => Ok(RunType::Backup),
            "prune" => Ok(RunType::Prune),
            _ => Err(format!("Invalid run type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Invalid run status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BackupPending,
    BackupRunning,
    BackupCompleted,
    BackupFailed,
    WorkerUnreachable,
    BackupSizeAnomaly,
    PruneCompleted,
    PruneFailed,
    ManualBackupCompleted,
    SnapshotForgotten,
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EventType::BackupPending => write!(f, "backup_pending"),
            EventType::BackupRunning => write!(f, "backup_running"),
            EventType::BackupCompleted => write!(f, "backup_completed"),
            EventType::BackupFailed => write!(f, "backup_failed"),
            EventType::WorkerUnreachable => write!(f, "worker_unreachable"),
            EventType::BackupSizeAnomaly => write!(f, "backup_size_anomaly"),
            EventType::PruneCompleted => write!(f, "prune_completed"),
            EventType::PruneFailed => write!(f, "prune_failed"),
            EventType::ManualBackupCompleted => write!(f, "manual_backup_completed"),
            EventType::SnapshotForgotten => write!(f, "snapshot_forgotten"),
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backup_pending" => Ok(EventType::BackupPending),
            "backup_running" => Ok(EventType::BackupRunning),
            "backup_completed" => Ok(EventType::BackupCompleted),
            "backup_failed" => Ok(EventType::BackupFailed),
            "worker_unreachable" => Ok(EventType::WorkerUnreachable),
            "backup_size_anomaly" => Ok(EventType::BackupSizeAnomaly),
            "prune_completed" => Ok(EventType::PruneCompleted),
            "prune_failed" => Ok(EventType::PruneFailed),
            "manual_backup_completed" => Ok(EventType::ManualBackupCompleted),
            "snapshot_forgotten" => Ok(EventType::SnapshotForgotten),
            _ => Err(format!("Invalid event type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Open,
    Resolved,
}

impl Display for EventStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Open => write!(f, "open"),
            EventStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(EventStatus::Open),
            "resolved" => Ok(EventStatus::Resolved),
            _ => Err(format!("Invalid event status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

impl Display for EventSeverity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EventSeverity::Info => write!(f, "info"),
            EventSeverity::Warning => write!(f, "warning"),
            EventSeverity::Error => write!(f, "error"),
        }
    }
}

impl FromStr for EventSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(EventSeverity::Info),
            "warning" => Ok(EventSeverity::Warning),
            "error" => Ok(EventSeverity::Error),
            _ => Err(format!("Invalid event severity: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    LargerThanExpected,
    SmallerThanExpected,
}

impl Display for AnomalyReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyReason::LargerThanExpected => write!(f, "larger_than_expected"),
            AnomalyReason::SmallerThanExpected => write!(f, "smaller_than_expected"),
        }
    }
}

impl FromStr for AnomalyReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "larger_than_expected" => Ok(AnomalyReason::LargerThanExpected),
            "smaller_than_expected" => Ok(AnomalyReason::SmallerThanExpected),
            _ => Err(format!("Invalid anomaly reason: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub user_id: UserId,
    pub name: String,
    pub region: Option<String>,
    pub status: WorkerStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub uptime_ms: i64,
    pub requests_total: i64,
    pub error_total: i64,
    pub endpoint: Option<String>,
    pub sync_token: Option<TokenSecret>,
    pub sync_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        self.last_seen_at
            .map(|seen| now - seen <= chrono::Duration::seconds(WORKER_ONLINE_WINDOW_SECONDS))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: RepositoryId,
    pub user_id: UserId,
    pub name: String,
    pub backend: RepositoryBackend,
    pub path: String,
    pub password: Option<TokenSecret>,
    pub options: BTreeMap<String, String>,
    pub initialized_at: Option<DateTime<Utc>>,
    pub primary_worker_id: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_last: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_daily: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_weekly: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_monthly: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_yearly: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_within: Option<String>,
}

impl RetentionRules {
    pub fn any_rule(&self) -> bool {
        self.keep_last.is_some()
            || self.keep_daily.is_some()
            || self.keep_weekly.is_some()
            || self.keep_monthly.is_some()
            || self.keep_yearly.is_some()
            || self.keep_within.is_some()
    }
}

/// Per-plan path selection. `default_paths` apply to every worker unless the
/// worker has a non-empty entry in `worker_paths`.
///
/// The persisted form used to be a bare array of paths; that legacy encoding
/// still deserializes as `{default_paths: <array>, worker_paths: {}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPathsConfig {
    pub default_paths: Vec<String>,
    pub worker_paths: BTreeMap<WorkerId, Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanPathsConfigRepr {
    Structured {
        #[serde(rename = "defaultPaths", default)]
        default_paths: Vec<String>,
        #[serde(rename = "workerPaths", default)]
        worker_paths: BTreeMap<WorkerId, Vec<String>>,
    },
    Legacy(Vec<String>),
}

impl<'de> Deserialize<'de> for PlanPathsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match PlanPathsConfigRepr::deserialize(deserializer)? {
            PlanPathsConfigRepr::Structured {
                default_paths,
                worker_paths,
            } => Ok(PlanPathsConfig {
                default_paths,
                worker_paths,
            }),
            PlanPathsConfigRepr::Legacy(default_paths) => Ok(PlanPathsConfig {
                default_paths,
                worker_paths: BTreeMap::new(),
            }),
        }
    }
}

impl PlanPathsConfig {
    pub fn is_empty(&self) -> bool {
        self.default_paths.is_empty() && self.worker_paths.values().all(|paths| paths.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub id: PlanId,
    pub user_id: UserId,
    pub repository_id: RepositoryId,
    /// Kept for back-compat with older clients; the plan↔worker set is the
    /// authoritative fan-out list.
    pub worker_id: Option<WorkerId>,
    pub name: String,
    pub cron: String,
    pub paths: PlanPathsConfig,
    pub tags: Vec<String>,
    pub dry_run: bool,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<PlanStatus>,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<i64>,
    pub prune: bool,
    pub retention: RetentionRules,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BackupRun {
    pub id: RunId,
    pub plan_id: PlanId,
    pub user_id: UserId,
    pub repository_id: RepositoryId,
    pub worker_id: Option<WorkerId>,
    pub run_group_id: Option<RunGroupId>,
    pub run_type: RunType,
    pub status: RunStatus,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub snapshot_id: Option<String>,
    pub snapshot_time: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEvent {
    pub id: Uuid,
    pub user_id: UserId,
    pub repository_id: RepositoryId,
    pub plan_id: Option<PlanId>,
    pub run_id: Option<RunId>,
    pub worker_id: Option<WorkerId>,
    pub event_type: EventType,
    pub status: EventStatus,
    pub severity: EventSeverity,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RunMetric {
    pub id: Uuid,
    pub run_id: RunId,
    pub user_id: UserId,
    pub plan_id: Option<PlanId>,
    pub repository_id: RepositoryId,
    pub snapshot_id: Option<String>,
    pub bytes_added: i64,
    pub bytes_processed: Option<i64>,
    pub files_new: Option<i64>,
    pub files_changed: Option<i64>,
    pub files_unmodified: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SizeAnomaly {
    pub id: Uuid,
    pub metric_id: Uuid,
    pub user_id: UserId,
    pub plan_id: Option<PlanId>,
    pub repository_id: RepositoryId,
    pub expected_bytes: i64,
    pub actual_bytes: i64,
    pub deviation_score: f64,
    pub status: EventStatus,
    pub severity: EventSeverity,
    pub reason: AnomalyReason,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// The wire payload POSTed to a worker's `/rustic/backup`, and the payload
/// stored under `output.request` on pending pull-mode runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct BackupRequest {
    pub backend: String,
    pub options: BTreeMap<String, String>,
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub dry_run: bool,
}

/// The wire payload POSTed to a worker's `/rustic/forget`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetRequest {
    pub backend: String,
    pub options: BTreeMap<String, String>,
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub prune: bool,
    #[serde(flatten)]
    pub retention: RetentionRules,
}

// --- API payloads ----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct ErrorsBody {
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct WorkerSyncRequest {
    pub status: WorkerStatus,
    pub endpoint: Option<String>,
    pub uptime_ms: i64,
    pub requests_total: i64,
    pub error_total: i64,
}

#[derive(Debug, Clone, Deserialize, Object)]
pub struct ClaimRunsRequest {
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct ClaimedRun {
    pub id: RunId,
    pub plan_id: PlanId,
    pub repository_id: RepositoryId,
    pub request: BackupRequest,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct CompleteRunRequest {
    pub status: RunStatus,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub snapshot_id: Option<String>,
    pub snapshot_time: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct PlanCatalogEntry {
    pub id: PlanId,
    pub name: String,
    pub repository_id: RepositoryId,
    pub cron: String,
    pub paths: Vec<String>,
    pub tags: Vec<String>,
    pub dry_run: bool,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum BulkPlanAction {
    Trigger,
    Pause,
    Resume,
    Delete,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct BulkPlanRequest {
    pub action: BulkPlanAction,
    pub plan_ids: Vec<PlanId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Enum)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum BulkPlanOutcome {
    Triggered,
    Conflict,
    Paused,
    Resumed,
    Deleted,
    NotFound,
    Failed,
}

#[derive(Debug, Clone, Serialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct BulkPlanResult {
    pub id: PlanId,
    pub outcome: BulkPlanOutcome,
}

/// One logical snapshot execution as reported by the attribution reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct SnapshotExecution {
    pub snapshot_id: String,
    pub snapshot_time: Option<DateTime<Utc>>,
    pub snapshot_ids: Vec<String>,
    pub run_group_ids: Vec<RunGroupId>,
    pub worker_ids: Vec<WorkerId>,
    pub run_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct SweepReport {
    pub repositories_checked: u64,
    pub workers_queried: u64,
    pub imported_runs: u64,
}

#[derive(Debug, Clone, Serialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct SignupStatus {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Object)]
pub struct VersionInfo {
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Object)]
pub struct HealthcheckResponse {}

#[derive(Debug, Clone, Serialize, Object)]
pub struct Empty {}

/// Opaque worker result forwarded to the web client.
#[derive(Debug, Clone, Serialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct MaintenanceResult {
    pub success: bool,
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct RestoreBody {
    pub snapshot_id: String,
    pub target_path: String,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct SnapshotFilesBody {
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Deserialize, Object)]
pub struct LsDirsBody {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn legacy_paths_array_deserializes_into_default_paths() {
        let config: PlanPathsConfig = serde_json::from_str(r#"["/a", "/b", "/c"]"#).unwrap();
        assert_eq!(
            config.default_paths,
            vec!["/a".to_string(), "/b".to_string(), "/c".to_string()]
        );
        assert!(config.worker_paths.is_empty());
    }

    #[test]
    fn structured_paths_config_round_trips() {
        let worker = WorkerId::new_v4();
        let json = serde_json::json!({
            "defaultPaths": ["/data"],
            "workerPaths": { worker.to_string(): ["/var/lib"] }
        });
        let config: PlanPathsConfig = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(config.default_paths, vec!["/data".to_string()]);
        assert_eq!(
            config.worker_paths.get(&worker),
            Some(&vec!["/var/lib".to_string()])
        );
        let reserialized = serde_json::to_value(&config).unwrap();
        assert_eq!(reserialized, json);
    }

    #[test]
    fn backup_request_wire_format_is_camel_case() {
        let request = BackupRequest {
            backend: "s3".to_string(),
            options: BTreeMap::new(),
            repository: "s3:bucket".to_string(),
            password: None,
            paths: vec!["/a".to_string()],
            tags: None,
            dry_run: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["dryRun"], serde_json::json!(true));
        assert!(value.get("password").is_none());
    }

    #[test]
    fn event_type_strings_match_the_persisted_form() {
        assert_eq!(
            EventType::ManualBackupCompleted.to_string(),
            "manual_backup_completed"
        );
        assert_eq!(
            EventType::from_str("backup_size_anomaly").unwrap(),
            EventType::BackupSizeAnomaly
        );
    }
}
