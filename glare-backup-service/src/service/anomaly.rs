use crate::metrics as prom;
use crate::model::{AnomalyReason, EventSeverity, EventStatus, EventType, RunMetric, SizeAnomaly};
use crate::repo::event::{EventRecord, EventRepo};
use crate::repo::metrics::MetricsRepo;
use crate::repo::RepoError;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Fewer prior samples than this and the detector stays silent.
pub const MIN_SAMPLES: usize = 5;
/// Prior metrics considered, newest first.
pub const MAX_SAMPLES: i64 = 30;
/// Deviation scores below this resolve open anomalies instead of raising one.
pub const WARNING_SCORE: f64 = 3.5;
/// Scores at or above this escalate the anomaly severity to error.
pub const ERROR_SCORE: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesScore {
    pub median: i64,
    pub mad: i64,
    pub score: f64,
}

/// Scores `actual` against the positive values of the prior series using the
/// median absolute deviation. `None` when the series is too short to judge.
pub fn evaluate_series(prior: &[i64], actual: i64) -> Option<SeriesScore> {
    let mut samples: Vec<i64> = prior.iter().copied().filter(|v| *v > 0).collect();
    if samples.len() < MIN_SAMPLES {
        return None;
    }
    samples.sort_unstable();

    let median = samples[samples.len() / 2];

    let mut deviations: Vec<i64> = samples.iter().map(|v| (v - median).abs()).collect();
    deviations.sort_unstable();
    let mad = deviations[deviations.len() / 2];

    let score = (actual - median).abs() as f64 / mad.max(1) as f64;

    Some(SeriesScore { median, mad, score })
}

/// MAD-based outlier detection over the bytes-added series of a plan (or, for
/// plan-less metrics, of the whole repository).
pub struct SizeAnomalyService {
    metrics_repo: Arc<dyn MetricsRepo>,
    event_repo: Arc<dyn EventRepo>,
}

impl SizeAnomalyService {
    pub fn new(metrics_repo: Arc<dyn MetricsRepo>, event_repo: Arc<dyn EventRepo>) -> Self {
        Self {
            metrics_repo,
            event_repo,
        }
    }

    pub async fn evaluate(&self, metric: &RunMetric) -> Result<Option<SizeAnomaly>, RepoError> {
        let prior = self
            .metrics_repo
            .prior_bytes_added(
                &metric.user_id.0,
                metric.plan_id.as_ref().map(|p| &p.0),
                &metric.repository_id.0,
                &metric.id,
                metric.created_at,
                MAX_SAMPLES,
            )
            .await?;

        let Some(scored) = evaluate_series(&prior, metric.bytes_added) else {
            return Ok(None);
        };

        let now = Utc::now();

        if scored.score < WARNING_SCORE {
            self.metrics_repo
                .resolve_open_anomalies(
                    &metric.user_id.0,
                    metric.plan_id.as_ref().map(|p| &p.0),
                    &metric.repository_id.0,
                    now,
                )
                .await?;
            return Ok(None);
        }

        let severity = if scored.score >= ERROR_SCORE {
            EventSeverity::Error
        } else {
            EventSeverity::Warning
        };
        let reason = if metric.bytes_added > scored.median {
            AnomalyReason::LargerThanExpected
        } else {
            AnomalyReason::SmallerThanExpected
        };

        let anomaly = SizeAnomaly {
            id: Uuid::new_v4(),
            metric_id: metric.id,
            user_id: metric.user_id,
            plan_id: metric.plan_id,
            repository_id: metric.repository_id,
            expected_bytes: scored.median,
            actual_bytes: metric.bytes_added,
            deviation_score: scored.score,
            status: EventStatus::Open,
            severity,
            reason,
            detected_at: now,
            resolved_at: None,
        };

        self.metrics_repo
            .insert_anomaly(&anomaly.clone().into())
            .await?;

        let mut event = EventRecord::new(
            metric.user_id.0,
            metric.repository_id.0,
            EventType::BackupSizeAnomaly,
            severity,
            format!(
                "Backup size {} bytes deviates from the expected {} bytes",
                metric.bytes_added, scored.median
            ),
            now,
        )
        .with_run(metric.run_id.0)
        .with_details(serde_json::json!({
            "expectedBytes": scored.median,
            "actualBytes": metric.bytes_added,
            "score": scored.score,
        }));
        if let Some(plan_id) = metric.plan_id {
            event = event.with_plan(plan_id.0);
        }
        self.event_repo.insert(&event).await?;

        prom::ANOMALIES_OPENED_TOTAL.inc();
        info!(
            repository_id = %metric.repository_id,
            score = scored.score,
            "Backup size anomaly detected"
        );

        Ok(Some(anomaly))
    }
}
