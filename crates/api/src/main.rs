use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

use tally_api::app;
use tally_api::config::Config;
use tally_infra::jobs::{OutboxQueue, QueueConfig};
use tally_infra::projector::{Projector, ProjectorConfig};
use tally_infra::webhooks::{WebhookWorker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tally_observability::init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;

    tally_infra::MIGRATOR.run(&pool).await?;

    // Root cancellation signal: flips once on shutdown, observed by every
    // long-running loop between batches.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let projector = Projector::new(pool.clone(), ProjectorConfig::default());
    let mut workers = vec![tokio::spawn({
        let projector = projector.clone();
        let shutdown = shutdown_rx.clone();
        async move { projector.run(shutdown).await }
    })];

    let queue = OutboxQueue::new(pool.clone(), QueueConfig::default());
    let worker_config = WorkerConfig::default();
    let http = worker_config.build_client()?;
    let webhook_worker = WebhookWorker::new(pool.clone(), queue, http, worker_config);
    workers.extend(webhook_worker.spawn_pool(shutdown_rx.clone()));

    let app = app::build_app(pool, config.jwt_secret.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The server has drained; stop the workers and give them the grace
    // period to finish in-flight batches.
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if tokio::time::timeout(config.shutdown_grace, worker)
            .await
            .is_err()
        {
            tracing::warn!("worker did not stop within the grace period; aborting");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
