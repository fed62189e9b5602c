//! carvet-vv - Vehicle Verification Service
//!
//! Cross-checks vehicle listing claims against their uploaded photos via an
//! external AI vision API and drives each listing through the verification
//! lifecycle. Shares the carvet database with the listing backend.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use carvet_common::events::EventBus;
use carvet_vv::services::verifier::VerificationEngine;
use carvet_vv::services::vision::VisionClient;
use carvet_vv::AppState;

/// Default HTTP port for the verification service
const DEFAULT_PORT: u16 = 5860;

#[derive(Debug, Parser)]
#[command(name = "carvet-vv", about = "Carvet vehicle verification service")]
struct Args {
    /// Root folder holding the shared database (overrides env and TOML)
    #[arg(long)]
    root_folder: Option<String>,

    /// HTTP listen port
    #[arg(long, default_value_t = DEFAULT_PORT, env = "CARVET_VV_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Build identification immediately after tracing init, before any
    // database delays
    info!(
        "Starting carvet-vv (Vehicle Verification) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    // Resolve root folder and open the shared database
    let root_folder =
        carvet_common::config::resolve_root_folder(args.root_folder.as_deref(), "CARVET_ROOT_FOLDER");
    carvet_common::config::ensure_root_folder(&root_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    let db_path = carvet_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let db_pool = carvet_vv::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Vision endpoint configuration (database -> env -> TOML)
    let toml_config = carvet_common::config::load_toml_config().unwrap_or_default();
    let vision_config = carvet_vv::config::resolve_vision_config(&db_pool, &toml_config)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    info!(model = %vision_config.model, "Vision client configured");

    let vision_client =
        VisionClient::new(vision_config).map_err(|e| anyhow::anyhow!("{}", e))?;

    // Event bus for SSE broadcasting
    let event_bus = EventBus::new(100);

    let engine = VerificationEngine::new(db_pool.clone(), event_bus.clone(), vision_client);
    let state = AppState::new(db_pool, event_bus, engine);
    let app = carvet_vv::build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    info!("Listening on http://127.0.0.1:{}", args.port);
    info!("Health check: http://127.0.0.1:{}/health", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
