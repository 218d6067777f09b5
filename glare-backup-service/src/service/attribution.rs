use crate::model::{BackupEvent, BackupRun, EventStatus, EventType, RunStatus, SnapshotExecution};
use crate::repo::event::EventRepo;
use crate::repo::run::RunRepo;
use crate::repo::RepoError;
use crate::service::snapshots::{extract_primary_snapshot, SnapshotRef};
use chrono::{DateTime, Utc};
use glare_common::model::{RepositoryId, RunGroupId, UserId, WorkerId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How many recent runs and events feed one attribution pass.
pub const ATTRIBUTION_WINDOW: i64 = 1000;

/// Read-side reducer answering "which workers produced which logical
/// snapshot". Runs are authoritative; events only fill gaps; run-groups
/// collapse per-worker snapshots into one logical execution.
pub struct AttributionService {
    run_repo: Arc<dyn RunRepo>,
    event_repo: Arc<dyn EventRepo>,
}

impl AttributionService {
    pub fn new(run_repo: Arc<dyn RunRepo>, event_repo: Arc<dyn EventRepo>) -> Self {
        Self {
            run_repo,
            event_repo,
        }
    }

    pub async fn snapshot_executions(
        &self,
        user_id: &UserId,
        repository_id: &RepositoryId,
    ) -> Result<Vec<SnapshotExecution>, RepoError> {
        let runs: Vec<BackupRun> = self
            .run_repo
            .recent_backup_runs(&user_id.0, &repository_id.0, ATTRIBUTION_WINDOW)
            .await?
            .into_iter()
            .filter_map(|record| BackupRun::try_from(record).ok())
            .collect();

        let events: Vec<BackupEvent> = self
            .event_repo
            .recent_for_repository(&user_id.0, &repository_id.0, ATTRIBUTION_WINDOW)
            .await?
            .into_iter()
            .filter_map(|record| BackupEvent::try_from(record).ok())
            .collect();

        Ok(reduce_snapshot_executions(&runs, &events))
    }
}

#[derive(Debug, Clone)]
struct SnapshotBucket {
    snapshot_id: String,
    normalized: String,
    snapshot_time: Option<DateTime<Utc>>,
    run_group_ids: BTreeSet<RunGroupId>,
    worker_ids: BTreeSet<WorkerId>,
    total: i64,
    success: i64,
    failure: i64,
    last_started_at: Option<DateTime<Utc>>,
}

impl SnapshotBucket {
    fn new(snapshot_id: &str, normalized: String) -> Self {
        SnapshotBucket {
            snapshot_id: snapshot_id.to_string(),
            normalized,
            snapshot_time: None,
            run_group_ids: BTreeSet::new(),
            worker_ids: BTreeSet::new(),
            total: 0,
            success: 0,
            failure: 0,
            last_started_at: None,
        }
    }

    fn observe_time(&mut self, snapshot_id: &str, time: Option<DateTime<Utc>>) {
        if let Some(time) = time {
            if self.snapshot_time.map(|current| time > current).unwrap_or(true) {
                self.snapshot_time = Some(time);
                self.snapshot_id = snapshot_id.to_string();
            }
        }
    }
}

pub fn reduce_snapshot_executions(
    runs: &[BackupRun],
    events: &[BackupEvent],
) -> Vec<SnapshotExecution> {
    let mut buckets: BTreeMap<String, SnapshotBucket> = BTreeMap::new();

    // Pass 1: runs.
    for run in runs {
        let Some(worker_id) = run.worker_id else {
            continue;
        };
        let Some(snapshot) = run_snapshot_ref(run) else {
            continue;
        };
        let normalized = snapshot.id.to_lowercase();

        let bucket = buckets
            .entry(normalized.clone())
            .or_insert_with(|| SnapshotBucket::new(&snapshot.id, normalized.clone()));
        bucket.observe_time(&snapshot.id, snapshot.time);
        if let Some(run_group_id) = run.run_group_id {
            bucket.run_group_ids.insert(run_group_id);
        }
        bucket.worker_ids.insert(worker_id);
        bucket.total += 1;
        match run.status {
            RunStatus::Success => bucket.success += 1,
            RunStatus::Failed => bucket.failure += 1,
            RunStatus::Pending | RunStatus::Running => {}
        }
        if let Some(started_at) = run.started_at {
            if bucket
                .last_started_at
                .map(|current| started_at > current)
                .unwrap_or(true)
            {
                bucket.last_started_at = Some(started_at);
            }
        }
    }

    // Pass 2: events, only where runs left a gap; counting an event on top of
    // its own run would inflate the totals.
    for event in events {
        let Some(worker_id) = event.worker_id else {
            continue;
        };
        let Some(snapshot_id) = event
            .details
            .as_ref()
            .and_then(|details| details.get("snapshotId"))
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
        else {
            continue;
        };
        let normalized = snapshot_id.to_lowercase();
        if buckets.contains_key(&normalized) {
            continue;
        }

        let snapshot_time = event
            .details
            .as_ref()
            .and_then(|details| details.get("snapshotTime"))
            .and_then(|time| time.as_str())
            .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
            .map(|time| time.with_timezone(&Utc));

        let succeeded = event.event_type == EventType::ManualBackupCompleted
            || event.status == EventStatus::Resolved;

        let bucket = buckets
            .entry(normalized.clone())
            .or_insert_with(|| SnapshotBucket::new(snapshot_id, normalized.clone()));
        bucket.observe_time(snapshot_id, snapshot_time);
        bucket.worker_ids.insert(worker_id);
        bucket.total += 1;
        if succeeded {
            bucket.success += 1;
        } else {
            bucket.failure += 1;
        }
        if bucket
            .last_started_at
            .map(|current| event.created_at > current)
            .unwrap_or(true)
        {
            bucket.last_started_at = Some(event.created_at);
        }
    }

    // Pass 3: merge buckets that belong to the same fire.
    let mut merged: BTreeMap<String, MergedExecution> = BTreeMap::new();
    for bucket in buckets.into_values() {
        let key = if bucket.run_group_ids.is_empty() {
            format!("snapshot:{}", bucket.normalized)
        } else {
            let ids: Vec<String> = bucket
                .run_group_ids
                .iter()
                .map(|id| id.to_string())
                .collect();
            format!("rungroups:{}", ids.join(","))
        };
        merged.entry(key).or_default().absorb(bucket);
    }

    let mut executions: Vec<SnapshotExecution> = merged
        .into_values()
        .map(MergedExecution::into_execution)
        .collect();

    executions.sort_by(|a, b| match (a.snapshot_time, b.snapshot_time) {
        (Some(a_time), Some(b_time)) => b_time.cmp(&a_time),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.snapshot_id.cmp(&b.snapshot_id),
    });
    executions
}

fn run_snapshot_ref(run: &BackupRun) -> Option<SnapshotRef> {
    run.output
        .as_ref()
        .and_then(extract_primary_snapshot)
        .or_else(|| {
            run.snapshot_id.as_ref().map(|id| SnapshotRef {
                id: id.clone(),
                time: run.snapshot_time,
            })
        })
}

#[derive(Debug, Default)]
struct MergedExecution {
    representative_id: String,
    representative_normalized: String,
    snapshot_time: Option<DateTime<Utc>>,
    snapshot_ids: BTreeSet<String>,
    run_group_ids: BTreeSet<RunGroupId>,
    worker_ids: BTreeSet<WorkerId>,
    total: i64,
    success: i64,
    failure: i64,
    last_started_at: Option<DateTime<Utc>>,
}

impl MergedExecution {
    /// Representative snapshot: latest by time, higher normalized id on ties.
    fn absorb(&mut self, bucket: SnapshotBucket) {
        let take_representative = if self.representative_id.is_empty() {
            true
        } else {
            match (bucket.snapshot_time, self.snapshot_time) {
                (Some(candidate), Some(current)) => {
                    candidate > current
                        || (candidate == current
                            && bucket.normalized > self.representative_normalized)
                }
                (Some(_), None) => true,
                (None, None) => bucket.normalized > self.representative_normalized,
                (None, Some(_)) => false,
            }
        };
        if take_representative {
            self.representative_id = bucket.snapshot_id.clone();
            self.representative_normalized = bucket.normalized.clone();
            self.snapshot_time = bucket.snapshot_time.or(self.snapshot_time);
        }

        self.snapshot_ids.insert(bucket.snapshot_id);
        self.run_group_ids.extend(bucket.run_group_ids);
        self.worker_ids.extend(bucket.worker_ids);
        self.total += bucket.total;
        self.success += bucket.success;
        self.failure += bucket.failure;
        if bucket.last_started_at > self.last_started_at {
            self.last_started_at = bucket.last_started_at;
        }
    }

    fn into_execution(self) -> SnapshotExecution {
        let collapsed = !self.run_group_ids.is_empty();
        let run_count = if collapsed {
            self.run_group_ids.len() as i64
        } else {
            self.total
        };
        let (success_count, failure_count) = if collapsed {
            (self.success.min(run_count), self.failure.min(run_count))
        } else {
            (self.success, self.failure)
        };

        SnapshotExecution {
            snapshot_id: self.representative_id,
            snapshot_time: self.snapshot_time,
            snapshot_ids: self.snapshot_ids.into_iter().collect(),
            run_group_ids: self.run_group_ids.into_iter().collect(),
            worker_ids: self.worker_ids.into_iter().collect(),
            run_count,
            success_count,
            failure_count,
            last_started_at: self.last_started_at,
        }
    }
}
