use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mrq_server::app_state::AppState;
use mrq_server::config::AppConfig;
use mrq_server::services::process::ProcessSupervisor;
use mrq_server::services::runner::Runner;
use mrq_server::services::scheduler::Scheduler;
use mrq_server::services::templates::TemplateRegistry;
use mrq_server::{db, routes};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing mrq-server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    std::fs::create_dir_all(&config.data_root).expect("Failed to create data root");

    tracing::info!(url = %config.database_url, "Opening SQLite database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to open database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let templates = TemplateRegistry::load(&config.templates_path)
        .expect("Failed to load render templates");
    tracing::info!(
        path = %config.templates_path.display(),
        count = templates.len(),
        "Loaded render templates"
    );
    let templates = Arc::new(templates);

    let supervisor = ProcessSupervisor::new();
    let runner = Runner::new(db_pool.clone(), supervisor.clone(), config.runner_settings());
    let mut scheduler = Scheduler::new(
        db_pool.clone(),
        Arc::clone(&templates),
        config.gpu_probe(),
        config.admission_limits(),
        runner,
        config.scheduler_poll_interval(),
    );
    scheduler.start();

    let state = AppState::new(db_pool, templates, supervisor, config.cancel_grace());
    let app = routes::router(state, prometheus_handle);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    scheduler.stop().await;
    tracing::info!("Shutdown complete");
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
