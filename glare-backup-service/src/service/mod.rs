use crate::config::BackupServiceConfig;
use crate::db;
use crate::repo::event::{DbEventRepo, EventRepo};
use crate::repo::metrics::DbMetricsRepo;
use crate::repo::plan::DbPlanRepo;
use crate::repo::repository::DbRepositoryRepo;
use crate::repo::run::{DbRunRepo, RunRepo};
use crate::repo::user::DbUserRepo;
use crate::repo::worker::DbWorkerRepo;
use crate::service::anomaly::SizeAnomalyService;
use crate::service::attribution::AttributionService;
use crate::service::auth::{ApiTokenAuthService, AuthService, WorkerAuthService};
use crate::service::dispatcher::Dispatcher;
use crate::service::event_stream::EventStreamRegistry;
use crate::service::lease::LeaseManager;
use crate::service::maintenance::MaintenanceService;
use crate::service::notify::{LoggedNotificationService, NotificationService};
use crate::service::outcome::RunOutcomeService;
use crate::service::plans::PlanService;
use crate::service::retention::RetentionService;
use crate::service::run_groups::RunGroupService;
use crate::service::runs::RunService;
use crate::service::scheduler::PlanScheduler;
use crate::service::signup::SignupStatusService;
use crate::service::sweeper::SnapshotSweeper;
use crate::service::worker_client::{RusticWorkerClient, WorkerApi};
use crate::service::workers::WorkerService;
use std::sync::Arc;

pub mod anomaly;
pub mod attribution;
pub mod auth;
pub mod dispatcher;
pub mod event_stream;
pub mod lease;
pub mod maintenance;
pub mod notify;
pub mod options;
pub mod outcome;
pub mod paths;
pub mod plans;
pub mod retention;
pub mod run_groups;
pub mod runs;
pub mod scheduler;
pub mod signup;
pub mod snapshots;
pub mod sweeper;
pub mod worker_client;
pub mod workers;

#[derive(Clone)]
pub struct Services {
    pub auth_service: Arc<dyn AuthService>,
    pub worker_auth_service: Arc<WorkerAuthService>,
    pub worker_service: Arc<WorkerService>,
    pub run_service: Arc<RunService>,
    pub plan_service: Arc<PlanService>,
    pub attribution_service: Arc<AttributionService>,
    pub maintenance_service: Arc<MaintenanceService>,
    pub signup_service: Arc<SignupStatusService>,
    pub sweeper: Arc<SnapshotSweeper>,
    pub scheduler: Arc<PlanScheduler>,
    pub event_repo: Arc<dyn EventRepo>,
    pub event_stream_registry: Arc<EventStreamRegistry>,
}

impl Services {
    pub async fn new(config: &BackupServiceConfig) -> Result<Services, String> {
        let db_pool = Arc::new(
            db::create_postgres_pool(&config.db)
                .await
                .map_err(|e| e.to_string())?,
        );

        let worker_repo = Arc::new(DbWorkerRepo::new(db_pool.clone()));
        let repository_repo = Arc::new(DbRepositoryRepo::new(db_pool.clone()));
        let plan_repo = Arc::new(DbPlanRepo::new(db_pool.clone()));
        let run_repo: Arc<dyn RunRepo> = Arc::new(DbRunRepo::new(db_pool.clone()));
        let event_repo: Arc<dyn EventRepo> = Arc::new(DbEventRepo::new(db_pool.clone()));
        let metrics_repo = Arc::new(DbMetricsRepo::new(db_pool.clone()));
        let user_repo = Arc::new(DbUserRepo::new(db_pool.clone()));

        let worker_api: Arc<dyn WorkerApi> = Arc::new(RusticWorkerClient::new()?);
        let notification_service: Arc<dyn NotificationService> =
            Arc::new(LoggedNotificationService);

        let anomaly_service = Arc::new(SizeAnomalyService::new(
            metrics_repo.clone(),
            event_repo.clone(),
        ));
        let outcome_service = Arc::new(RunOutcomeService::new(
            metrics_repo.clone(),
            anomaly_service.clone(),
        ));
        let retention_service = Arc::new(RetentionService::new(
            plan_repo.clone(),
            repository_repo.clone(),
            worker_repo.clone(),
            run_repo.clone(),
            event_repo.clone(),
            worker_api.clone(),
        ));
        let run_group_service = Arc::new(RunGroupService::new(
            plan_repo.clone(),
            retention_service.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            plan_repo.clone(),
            repository_repo.clone(),
            worker_repo.clone(),
            run_repo.clone(),
            event_repo.clone(),
            worker_api.clone(),
            outcome_service.clone(),
            run_group_service.clone(),
            config.dispatch_mode(),
        ));

        let lease_manager = Arc::new(LeaseManager::new(
            plan_repo.clone(),
            lease::generate_owner_id(),
            config.lease_ttl,
        ));

        let scheduler = Arc::new(PlanScheduler::new(
            plan_repo.clone(),
            lease_manager.clone(),
            dispatcher.clone(),
            config.scheduler_poll_interval,
        ));

        let sweeper = Arc::new(SnapshotSweeper::new(
            repository_repo.clone(),
            worker_repo.clone(),
            plan_repo.clone(),
            run_repo.clone(),
            outcome_service.clone(),
            worker_api.clone(),
        ));

        let plan_service = Arc::new(PlanService::new(
            plan_repo.clone(),
            lease_manager.clone(),
            dispatcher.clone(),
        ));
        let run_service = Arc::new(RunService::new(
            run_repo.clone(),
            event_repo.clone(),
            outcome_service.clone(),
            run_group_service.clone(),
        ));
        let worker_service = Arc::new(WorkerService::new(
            worker_repo.clone(),
            plan_repo.clone(),
            notification_service.clone(),
        ));
        let attribution_service = Arc::new(AttributionService::new(
            run_repo.clone(),
            event_repo.clone(),
        ));
        let maintenance_service = Arc::new(MaintenanceService::new(
            repository_repo.clone(),
            worker_repo.clone(),
            worker_api.clone(),
        ));

        let worker_auth_service = Arc::new(WorkerAuthService::new(worker_repo.clone()));
        let auth_service: Arc<dyn AuthService> = Arc::new(ApiTokenAuthService::new(user_repo.clone()));
        let signup_service = Arc::new(SignupStatusService::new(user_repo));

        Ok(Services {
            auth_service,
            worker_auth_service,
            worker_service,
            run_service,
            plan_service,
            attribution_service,
            maintenance_service,
            signup_service,
            sweeper,
            scheduler,
            event_repo,
            event_stream_registry: Arc::new(EventStreamRegistry::new()),
        })
    }
}
