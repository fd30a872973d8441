use std::sync::Arc;

use anyhow::{Context, Error};
use aws_config::BehaviorVersion;
use axum::Router;
use envconfig::Envconfig;
use inventory_common::metrics::{serve, setup_metrics_routes};
use inventory_common::queue::pg::{PgQueue, DEFAULT_TABLE};
use inventory_common::redrive::RedrivePolicy;
use inventory_common::source::{FolderSource, ObjectSource, S3Source};
use inventory_producer::config::{Config, SourceKind};
use inventory_producer::handlers::{add_routes, AppState};
use inventory_producer::producer::Producer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn build_source(config: &Config) -> Result<Arc<dyn ObjectSource>, Error> {
    match config.source {
        SourceKind::Folder => {
            let source = FolderSource::new(&config.folder_root)
                .await
                .with_context(|| format!("failed to open folder {}", config.folder_root))?;
            Ok(Arc::new(source))
        }
        SourceKind::S3 => {
            let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
                .region(aws_config::Region::new(config.s3_region.clone()));

            if let Some(endpoint) = &config.s3_endpoint {
                aws_config_builder = aws_config_builder.endpoint_url(endpoint);
            }

            let aws_config = aws_config_builder.load().await;

            let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
            if config.s3_endpoint.is_some() {
                s3_config_builder = s3_config_builder.force_path_style(true);
            }

            let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());
            Ok(Arc::new(S3Source::new(client)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().context("failed to load configuration from env")?;

    let queue = PgQueue::new(
        &config.queue_name,
        DEFAULT_TABLE,
        &config.database_url,
        config.max_pg_connections,
        RedrivePolicy::default(),
    )
    .await
    .context("failed to initialize queue")?;

    if config.run_migrations {
        sqlx::migrate!("../migrations")
            .run(queue.pool())
            .await
            .context("failed to run migrations")?;
    }

    let state = AppState {
        producer: Arc::new(Producer::with_batch_size(
            Arc::new(queue),
            config.batch_size,
        )),
        source: build_source(&config).await?,
    };

    let app = add_routes(
        Router::new(),
        state,
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = setup_metrics_routes(app)?;

    let bind = config.bind();
    info!("listening on {}", bind);
    serve(app, &bind).await?;

    Ok(())
}
