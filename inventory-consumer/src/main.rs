use std::sync::Arc;

use anyhow::{Context, Error};
use axum::{routing::get, Router};
use envconfig::Envconfig;
use inventory_common::metrics::{serve, setup_metrics_routes};
use inventory_common::queue::pg::{PgQueue, DEFAULT_TABLE};
use inventory_common::store::PgStore;
use inventory_consumer::config::Config;
use inventory_consumer::processor::BatchProcessor;
use inventory_consumer::worker::ConsumerWorker;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "inventory consumer"
}

fn app() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().context("failed to load configuration from env")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    if config.run_migrations {
        sqlx::migrate!("../migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
    }

    let queue = Arc::new(PgQueue::new_from_pool(
        config.queue_name.as_str(),
        DEFAULT_TABLE,
        pool.clone(),
        config.redrive_policy(),
    ));
    let store = Arc::new(PgStore::new_from_pool(config.table_name.as_str(), pool));
    let processor = Arc::new(BatchProcessor::new(
        queue.clone(),
        store,
        config.id_strategy,
    ));

    let worker = ConsumerWorker::new(
        queue,
        processor,
        config.batch_size,
        config.poll_interval.0,
        config.max_concurrent_batches,
        config.oldest_message_alarm.0,
    );

    let router = setup_metrics_routes(app())?;
    let bind = config.bind();
    let http_server = tokio::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve metrics: {}", e);
        }
    });

    info!(
        "consuming {} with {:?} ids",
        config.queue_name.as_str(),
        config.id_strategy
    );
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    worker.run(shutdown).await?;

    http_server.abort();
    info!("exiting");

    Ok(())
}
