// Main entry point for API server (and, unless RUN_WORKERS=false, the stage workers)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use outreach_core::domains::leads::models::Stage;
use outreach_core::domains::leads::processors::handler_for;
use outreach_core::domains::leads::PostgresLeadStore;
use outreach_core::kernel::jobs::{shutdown_signal, JobQueue, PostgresJobQueue, WorkerHost};
use outreach_core::kernel::{OpenAiGenerator, ServerDeps, SimpleScraper};
use outreach_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,outreach_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting lead outreach pipeline");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Build dependencies
    let job_queue: Arc<dyn JobQueue> = Arc::new(PostgresJobQueue::new(pool.clone()));
    let scraper = SimpleScraper::new(config.scrape_timeout).context("Failed to build scraper")?;
    let generator = OpenAiGenerator::new(
        config.require_openai_api_key()?,
        config.openai_model.clone(),
        config.generation_timeout,
    )
    .context("Failed to build generator")?;
    let deps = ServerDeps::new(
        job_queue.clone(),
        Arc::new(PostgresLeadStore::new(pool.clone())),
        Arc::new(scraper),
        Arc::new(generator),
        config.timeouts(),
    );

    let shutdown = CancellationToken::new();

    // Start stage workers
    let workers = if config.run_workers {
        let concurrency = |stage: Stage| match stage {
            Stage::Scrape => config.scrape_concurrency,
            Stage::Analyze => config.analyze_concurrency,
            Stage::Draft => config.draft_concurrency,
        };
        let host = Stage::ALL
            .into_iter()
            .fold(WorkerHost::new(job_queue.clone()), |host, stage| {
                host.bind(
                    stage.queue_name(),
                    handler_for(stage, deps.clone()),
                    concurrency(stage),
                )
            })
            .with_shutdown_grace(config.shutdown_grace);
        tracing::info!(queues = ?host.queues(), "Starting stage workers");
        Some(tokio::spawn(host.run(shutdown.clone())))
    } else {
        tracing::info!("RUN_WORKERS=false, serving API only");
        None
    };

    // Start server
    let app = build_app(deps);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await
        .context("Server error")?;

    // Stop claiming, drain in-flight jobs, then release the pool
    tracing::info!("Shutting down");
    shutdown.cancel();
    if let Some(workers) = workers {
        match tokio::time::timeout(config.shutdown_grace + Duration::from_secs(5), workers).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "Worker host failed"),
            Ok(Err(e)) => tracing::error!(error = %e, "Worker host task panicked"),
            Err(_) => tracing::warn!("Worker host did not stop within the grace period"),
        }
    }
    pool.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}
