//! Main Entrypoint for the Parley API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Compiling the level set and wiring the collaborator services.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use parley_api::{
    config::{Config, Provider},
    db::Db,
    router::create_router,
    state::AppState,
};
use parley_core::{
    checks::{CheckEvaluator, MockCheckEvaluator, OpenAiCheckEvaluator},
    generate::{MessageGenerator, MockMessageGenerator, OpenAiMessageGenerator},
    interpreter::Interpreter,
    levels::LevelSet,
    scenario::{MockScenarioService, OpenAiScenarioService, ScenarioService},
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(Db::new(pool));
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Compile Levels and Wire Services ---
    let levels = Arc::new(LevelSet::build().context("Failed to compile level definitions")?);
    info!("Level graphs compiled.");

    let (generator, checker, scenarios): (
        Arc<dyn MessageGenerator>,
        Arc<dyn CheckEvaluator>,
        Arc<dyn ScenarioService>,
    ) = match &config.provider {
        Provider::OpenAi => {
            info!("Using the OpenAI provider.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY is required for the 'openai' provider")?;
            let openai_config = OpenAIConfig::new().with_api_key(api_key.clone());
            (
                Arc::new(OpenAiMessageGenerator::new(
                    openai_config.clone(),
                    config.chat_model.clone(),
                )),
                Arc::new(OpenAiCheckEvaluator::new(
                    openai_config.clone(),
                    config.chat_model.clone(),
                )),
                Arc::new(OpenAiScenarioService::new(
                    openai_config,
                    config.chat_model.clone(),
                )),
            )
        }
        Provider::Mock => {
            info!("Using the mock provider; generated content is canned.");
            (
                Arc::new(MockMessageGenerator),
                Arc::new(MockCheckEvaluator),
                Arc::new(MockScenarioService),
            )
        }
    };

    let interpreter = Arc::new(match config.rng_seed {
        Some(seed) => Interpreter::with_seed(generator, checker, seed),
        None => Interpreter::new(generator, checker),
    });

    let app_state = Arc::new(AppState {
        db,
        levels,
        interpreter,
        scenarios,
        config: Arc::new(config.clone()),
    });

    // --- 5. Build Router and Serve ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(app_state).layer(cors);

    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
