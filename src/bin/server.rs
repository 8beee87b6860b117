use clap::Parser;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use nodenexus_rotator::db::schema;
use nodenexus_rotator::db::services::{DbJobQueue, DbMachineDirectory};
use nodenexus_rotator::dns::DnsReconciler;
use nodenexus_rotator::dns::provider::AccountProviderFactory;
use nodenexus_rotator::passthrough::PassthroughGenerator;
use nodenexus_rotator::rotation::RotationEngine;
use nodenexus_rotator::server::config::ServerConfig;
use nodenexus_rotator::server::deployment_dispatcher::{DeploySettings, DeploymentDispatcher};
use nodenexus_rotator::server::rotation_scheduler::RotationScheduler;
use nodenexus_rotator::services::credential_cipher::CredentialCipher;
use nodenexus_rotator::services::pool_manager::PoolManager;
use nodenexus_rotator::version::VERSION;
use nodenexus_rotator::web::{AppState, create_axum_router};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false) // No ANSI colors in file
        .json(); // Log as JSON

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info,sea_orm=warn` level if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received.");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref())?;
    init_logging(&config.log_dir);
    info!("Starting rotator server, version: {}", VERSION);

    // --- Database Pool Setup ---
    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(10);
    let db: DatabaseConnection = Database::connect(opt).await?;
    if config.auto_create_schema {
        schema::create_tables(&db).await?;
        info!("Database schema ensured.");
    }

    // --- Rotation core ---
    let cipher = CredentialCipher::from_hex_key(&config.credential_key)?;
    let providers = Arc::new(AccountProviderFactory::new(
        cipher,
        config.cloudflare_api_base.clone(),
        config.provider_timeouts(),
    )?);
    let directory = Arc::new(DbMachineDirectory::new(
        db.clone(),
        Duration::from_secs(config.directory_timeout_seconds),
    ));
    let reconciler = Arc::new(DnsReconciler::new(db.clone(), providers));
    let engine = Arc::new(RotationEngine::new(
        db.clone(),
        directory.clone(),
        directory,
        reconciler,
        Duration::from_secs(config.health_freshness_seconds),
    ));

    // --- Fleet propagation ---
    let generator = PassthroughGenerator::new(db.clone());
    let dispatcher = Arc::new(DeploymentDispatcher::new(
        db.clone(),
        generator.clone(),
        Arc::new(DbJobQueue::new(db.clone())),
        DeploySettings {
            passthrough: config.passthrough_settings(),
            config_path: config.passthrough_config_path.clone(),
            reload_command: config.passthrough_reload_command.clone(),
            step_timeout: Duration::from_secs(config.job_step_timeout_seconds),
            wait_cap: Duration::from_secs(config.apply_wait_cap_seconds),
            ..Default::default()
        },
    ));
    let pool_manager = Arc::new(PoolManager::new(db.clone(), engine, dispatcher.clone()));

    // --- Background rotation ---
    let cancel = CancellationToken::new();
    let scheduler = Arc::new(RotationScheduler::new(
        db.clone(),
        pool_manager.clone(),
        Duration::from_secs(config.rotation_sweep_seconds),
    ));
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone()));

    // --- HTTP API ---
    let app_state = Arc::new(AppState {
        db_pool: db,
        pool_manager,
        dispatcher,
        generator,
    });
    let app = create_axum_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("HTTP API listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // The HTTP side is down; let the scheduler finish its current sweep.
    cancel.cancel();
    if let Err(e) = scheduler_handle.await {
        error!("Rotation scheduler task ended abnormally: {}", e);
    }
    info!("Server stopped.");
    Ok(())
}
