//! BullRush - realtime market-simulation game server
//! Mission: one authoritative process owning the game clock, trading
//! invariants, settlement pipeline, and mini-game prize distribution.

use anyhow::{Context, Result};
use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{delete, get, patch, post, put},
    Router,
};
use clap::Parser;
use bullrush_backend::{
    api,
    auth::{api as auth_api, auth_middleware},
    clock::now_ts,
    engine::{spawn_tick_loop, tick::TickContext, SettlementPipeline},
    middleware::request_logging,
    models::Config,
    state::AppState,
    store::Store,
    ws::session::websocket_handler,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line overrides for the env-based configuration.
#[derive(Parser, Debug)]
#[command(name = "bullrush", about = "Realtime market-simulation game server")]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
    /// SQLite database path (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database_path = database_url;
    }
    info!("🚀 BullRush game server starting");

    let store = Store::open(&config.database_path)
        .with_context(|| format!("failed to open database at {}", config.database_path))?;
    info!("📊 Database initialized at: {}", config.database_path);

    let app_state = AppState::build(config.clone(), store);

    // Load the script into memory; a broken script is a startup failure.
    let days = app_state
        .cache
        .reload(&app_state.store)
        .await
        .context("script load failed")?;
    info!("📜 Script cache loaded: {} days", days);

    // Restore any in-flight mini-game and re-arm its timers.
    app_state
        .minigame
        .rehydrate()
        .await
        .context("mini-game rehydration failed")?;

    // 1 Hz tick loop: clock broadcast, news publication, day boundaries.
    let settlement = Arc::new(SettlementPipeline::new(
        app_state.store.clone(),
        app_state.cache.clone(),
        app_state.bus.clone(),
        app_state.leaderboard.clone(),
    ));
    spawn_tick_loop(TickContext {
        store: app_state.store.clone(),
        cache: app_state.cache.clone(),
        bus: app_state.bus.clone(),
        settlement,
    });
    info!("⏰ Tick loop started (1 Hz)");

    // Presence sampler for the admin monitor (1-minute resolution).
    {
        let bus = app_state.bus.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                bus.record_presence_sample(now_ts());
            }
        });
    }

    // Public routes
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/login", post(auth_api::login))
        .with_state(app_state.clone());

    // Protected routes (valid JWT required; admin routes re-check the role)
    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth_api::get_current_user))
        .route("/api/auth/avatar", patch(auth_api::update_avatar))
        .route("/api/auth/account", patch(auth_api::update_account))
        .route("/api/admin/game/start", post(api::post_game_start))
        .route("/api/admin/game/stop", post(api::post_game_stop))
        .route("/api/admin/game/resume", post(api::post_game_resume))
        .route("/api/admin/game/restart", post(api::post_game_restart))
        .route("/api/admin/game/reset", post(api::post_game_reset))
        .route("/api/admin/params", get(api::get_params))
        .route("/api/admin/params", put(api::put_params))
        .route("/api/admin/users", get(api::get_users))
        .route("/api/admin/users/:id", put(api::put_user))
        .route("/api/admin/users/:id", delete(api::delete_user))
        .route("/api/admin/monitor/history", get(api::get_monitor_history))
        .route("/api/admin/events", get(api::get_events))
        .route("/api/admin/events", post(api::post_event))
        .route("/api/admin/events/:id", put(api::put_event))
        .route("/api/admin/events/:id", delete(api::delete_event))
        .route("/api/admin/script", get(api::get_script))
        .route("/api/admin/script", put(api::put_script))
        .route("/api/admin/script/generate", post(api::post_script_generate))
        .route("/api/admin/quiz-questions", get(api::get_quiz_questions))
        .route("/api/admin/quiz-questions", post(api::post_quiz_question))
        .route("/api/admin/quiz-questions/:id", put(api::put_quiz_question))
        .route(
            "/api/admin/quiz-questions/:id",
            delete(api::delete_quiz_question),
        )
        .route(
            "/api/admin/minority-questions",
            get(api::get_minority_questions),
        )
        .route(
            "/api/admin/minority-questions",
            post(api::post_minority_question),
        )
        .route(
            "/api/admin/minority-questions/:id",
            put(api::put_minority_question),
        )
        .route(
            "/api/admin/minority-questions/:id",
            delete(api::delete_minority_question),
        )
        .route("/api/admin/red-envelope", get(api::get_red_envelope_items))
        .route("/api/admin/red-envelope", post(api::post_red_envelope_item))
        .route(
            "/api/admin/red-envelope/:id",
            put(api::put_red_envelope_item),
        )
        .route(
            "/api/admin/red-envelope/:id",
            delete(api::delete_red_envelope_item),
        )
        .route("/ws", get(websocket_handler))
        .route_layer(axum_mw::from_fn_with_state(
            app_state.jwt.clone(),
            auth_middleware,
        ))
        .with_state(app_state.clone());

    let cors = match &config.cors_origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => {
                warn!("invalid CORS_ORIGIN, falling back to permissive");
                CorsLayer::permissive()
            }
        },
        None => CorsLayer::permissive(),
    };

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(axum_mw::from_fn(request_logging));

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "🐂 BullRush operational"
}

/// Initialize tracing with env-filter support
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bullrush_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
