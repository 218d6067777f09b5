use glare_backup_service::api::{combined_routes, make_open_api_service};
use glare_backup_service::config::{make_config_loader, BackupServiceConfig};
use glare_backup_service::service::Services;
use glare_backup_service::{db, metrics};
use glare_common::tracing::init_tracing_with_default_env_filter;
use poem::endpoint::PrometheusExporter;
use poem::listener::TcpListener;
use poem::middleware::Cors;
use poem::EndpointExt;
use prometheus::Registry;
use tracing::{error, info};

fn main() -> Result<(), std::io::Error> {
    if std::env::args().any(|arg| arg == "--dump-openapi-yaml") {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(dump_openapi_yaml())
    } else if let Some(config) = make_config_loader().load_or_dump_config() {
        init_tracing_with_default_env_filter(&config.tracing);
        let prometheus = metrics::register_all();

        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(async_main(&config, prometheus))
    } else {
        Ok(())
    }
}

async fn dump_openapi_yaml() -> Result<(), std::io::Error> {
    let config = BackupServiceConfig::default();
    let services = Services::new(&config).await.map_err(|e| {
        error!("Services - init error: {}", e);
        std::io::Error::other(e)
    })?;
    let open_api_service = make_open_api_service(&services);
    println!("{}", open_api_service.spec_yaml());
    Ok(())
}

async fn async_main(
    config: &BackupServiceConfig,
    prometheus_registry: Registry,
) -> Result<(), std::io::Error> {
    let http_port = config.http_port;
    info!("Starting backup service on port: http: {}", http_port);

    db::postgres_migrate(&config.db).await.map_err(|e| {
        error!("DB - init error: {}", e);
        std::io::Error::other(format!("Init error: {e:?}"))
    })?;

    let services = Services::new(config).await.map_err(|e| {
        error!("Services - init error: {}", e);
        std::io::Error::other(e)
    })?;

    tokio::spawn(services.scheduler.clone().run_loop());
    tokio::spawn(services.sweeper.clone().run_loop(config.sweep_interval));

    let cors = Cors::new()
        .allow_origin_regex(&config.cors_origin_regex)
        .allow_credentials(true);

    let app = combined_routes(&services)
        .nest("/metrics", PrometheusExporter::new(prometheus_registry))
        .with(cors);

    poem::Server::new(TcpListener::bind(format!("0.0.0.0:{http_port}")))
        .run(app)
        .await
        .expect("HTTP server failed");

    Ok(())
}
