use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rendezvous_server::config::Config;
use rendezvous_server::state::AppState;
use rendezvous_server::{db, handlers, websocket};

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "rendezvous_server=info,tower_http=info,sqlx=warn"
            .parse()
            .unwrap()
    });

    let config = Config::from_env().expect("Failed to load configuration");

    if config.is_dev() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    }

    info!("🚀 Rendezvous server starting...");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    info!("✅ Database migrations applied");

    db::health_check(&pool)
        .await
        .expect("Database health check failed");
    info!("✅ Database health check passed");

    // CORS: permissive in dev, origin-restricted in production.
    let cors = if config.is_dev() {
        info!("🔓 CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!(
                "🔒 CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied"
            );
        } else {
            info!("🔒 CORS: production mode, allowing origins: {:?}", config.allowed_origins);
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    let addr = config.server_addr();
    let heartbeat_interval = config.heartbeat_interval;
    let state = AppState::new(pool, config);

    // Background sweep: closes silent control channels, marks their
    // machines offline, and broadcasts presence to the rest of the fleet.
    tokio::spawn(websocket::run_heartbeat_sweep(state.clone()));
    info!(interval = ?heartbeat_interval, "🫀 Heartbeat sweep task spawned");

    // Stricter limit for authentication endpoints than the global one below.
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(5)
            .finish()
            .expect("Invalid auth governor configuration"),
    );

    let auth_router = Router::new()
        .route("/auth/register", axum::routing::post(handlers::auth::register))
        .route("/auth/login", axum::routing::post(handlers::auth::login))
        .route("/auth/me", get(handlers::auth::me))
        .route_layer(GovernorLayer {
            config: auth_governor_conf,
        });

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .finish()
            .expect("Invalid global governor configuration"),
    );

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ice-servers", get(handlers::ice::ice_servers))
        .merge(auth_router)
        .route("/ws", get(websocket::websocket_handler))
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    info!("🎧 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let shutdown_state = state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_state))
    .await
    .expect("Server failed to start");
}

async fn shutdown_signal(state: AppState) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("🛑 Shutdown signal received, draining connections...");
    state.connections.close_all().await;
}
