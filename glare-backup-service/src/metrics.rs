use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    pub static ref PLAN_FIRES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("glare_plan_fires_total", "Plan fires dispatched"),
        &["trigger"],
    )
    .unwrap();
    pub static ref RUNS_COMPLETED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("glare_runs_completed_total", "Backup runs reaching a terminal state"),
        &["status"],
    )
    .unwrap();
    pub static ref SWEEPER_IMPORTED_TOTAL: IntCounter = IntCounter::new(
        "glare_sweeper_imported_runs_total",
        "Runs synthesized by the snapshot reconciliation sweeper",
    )
    .unwrap();
    pub static ref ANOMALIES_OPENED_TOTAL: IntCounter = IntCounter::new(
        "glare_size_anomalies_opened_total",
        "Backup size anomalies raised",
    )
    .unwrap();
}

pub fn register_all() -> Registry {
    let registry = Registry::new();
    registry
        .register(Box::new(PLAN_FIRES_TOTAL.clone()))
        .expect("register glare_plan_fires_total");
    registry
        .register(Box::new(RUNS_COMPLETED_TOTAL.clone()))
        .expect("register glare_runs_completed_total");
    registry
        .register(Box::new(SWEEPER_IMPORTED_TOTAL.clone()))
        .expect("register glare_sweeper_imported_runs_total");
    registry
        .register(Box::new(ANOMALIES_OPENED_TOTAL.clone()))
        .expect("register glare_size_anomalies_opened_total");
    registry
}
