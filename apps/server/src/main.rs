mod auth;
mod booking;
mod db;
mod error;
mod handlers;
mod models;
mod rate_limit;
mod schedule;
mod slots;
mod telegram_layer;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use booking::VendorLocks;
use rate_limit::{limit_booking, limit_public, limit_vendor, RateLimiter};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    /// Token of the notification bot; empty disables Telegram pings.
    pub bot_token: String,
    pub started_at: Instant,
    pub locks: VendorLocks,
}

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:zapis.db?mode=rwc".into());
    let bot_token = std::env::var("BOT_TOKEN").unwrap_or_default();
    let ops_chat_id: Option<i64> = std::env::var("OPS_CHAT_ID")
        .ok()
        .and_then(|v| v.parse().ok());

    // ── Tracing: console + optional Telegram error alerts ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    match ops_chat_id {
        Some(chat_id) if !bot_token.is_empty() => {
            let tg_layer = telegram_layer::TelegramLayer::new(bot_token.clone(), chat_id);
            registry.with(tg_layer).init();
        }
        _ => registry.init(),
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let webapp_url = std::env::var("WEBAPP_URL").unwrap_or_default();

    if bot_token.is_empty() {
        tracing::warn!("BOT_TOKEN not set — vendor notifications disabled");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let state = Arc::new(AppState {
        db: pool,
        bot_token,
        started_at: Instant::now(),
        locks: VendorLocks::new(),
    });

    // ── Rate limiter + periodic cleanup ──
    let rate_limiter = RateLimiter::new();
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured ──
    let cors = if !webapp_url.is_empty() {
        let origins: Vec<axum::http::HeaderValue> = webapp_url
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // ── Router (4 groups with per-group middleware) ──

    // 1. No limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public booking page: read-only, 60 req/min
    let public_routes = Router::new()
        .route("/api/public/{slug}", get(handlers::public::vendor_card))
        .route(
            "/api/public/{slug}/services",
            get(handlers::public::list_services),
        )
        .route(
            "/api/public/{slug}/slots",
            get(handlers::public::list_slots),
        )
        .route(
            "/api/public/{slug}/days",
            get(handlers::public::month_days),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), limit_public));

    // 3. Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route(
            "/api/public/{slug}/bookings",
            post(handlers::public::create_booking),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), limit_booking));

    // 4. Vendor dashboard: API-key auth, 120 req/min
    let vendor_routes = Router::new()
        .route(
            "/api/vendor/schedule",
            get(handlers::vendor::get_schedule).put(handlers::vendor::put_schedule),
        )
        .route(
            "/api/vendor/exceptions",
            get(handlers::vendor::list_exceptions).put(handlers::vendor::put_exception),
        )
        .route(
            "/api/vendor/exceptions/{date}",
            delete(handlers::vendor::delete_exception),
        )
        .route(
            "/api/vendor/services",
            get(handlers::vendor::list_services).post(handlers::vendor::create_service),
        )
        .route(
            "/api/vendor/services/{id}",
            put(handlers::vendor::update_service).delete(handlers::vendor::delete_service),
        )
        .route(
            "/api/vendor/bookings",
            get(handlers::vendor::list_bookings).post(handlers::vendor::create_manual_booking),
        )
        .route(
            "/api/vendor/bookings/{id}/status",
            post(handlers::vendor::set_booking_status),
        )
        .route("/api/vendor/clients", get(handlers::vendor::list_clients))
        .layer(from_fn_with_state(state.clone(), auth::require_vendor))
        .layer(from_fn_with_state(rate_limiter.clone(), limit_vendor));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(vendor_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("zapis server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
