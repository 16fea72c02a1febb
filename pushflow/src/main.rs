use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use pushflow::config::ServiceConfig;
use pushflow::enqueue::HttpPublisher;
use pushflow::executor::{HttpExecutor, StageRegistry};
use pushflow::observability::{init_logging, LogFormat};
use pushflow::service::{router, PushCoordinator};
use pushflow::upstream::{HttpUpstreamReporter, NoOpUpstreamReporter, UpstreamReporter};

#[derive(Parser)]
#[command(
    name = "pushflow",
    version,
    about = "Push endpoint that runs pipeline stages and answers the broker with ACK or NACK"
)]
struct Cli {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides config and BIND_ADDR
    #[arg(long)]
    bind: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    config.apply_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = Some(format);
    }
    config.validate()?;
    config.validate_publishing()?;

    init_logging(config.log_format(), &config.log_level);

    if config.executors.is_empty() {
        anyhow::bail!("no stage executors configured; set `executors` in the config file");
    }
    let mut registry = StageRegistry::new();
    for (stage, endpoint) in &config.executors {
        let executor = HttpExecutor::new(stage.clone(), endpoint)
            .with_context(|| format!("building executor for stage '{stage}'"))?;
        registry.register(Arc::new(executor));
    }

    let enqueuer = Arc::new(HttpPublisher::new(&config.publisher)?);

    let reporter: Arc<dyn UpstreamReporter> = match config.upstream_url {
        Some(ref url) => Arc::new(HttpUpstreamReporter::new(url, config.upstream_timeout())?),
        None => Arc::new(NoOpUpstreamReporter),
    };

    let mut builder = PushCoordinator::builder(registry, enqueuer)
        .policies(config.retry.clone())
        .execution_ceiling(config.execution_ceiling())
        .reporter(reporter);
    if let Some(layout) = config.layout.clone() {
        builder = builder.layout(layout);
    }
    let coordinator = Arc::new(builder.build());

    let app = router(Arc::clone(&coordinator), &config.routes);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        app_env = %config.app_env,
        stages = ?coordinator.stages(),
        ack_deadline_secs = config.ack_deadline_secs,
        "Pushflow listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.drain_reports().await;
    tracing::info!("Pushflow stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
}
