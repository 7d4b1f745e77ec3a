use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub db_ok: bool,
    /// Vendors with live booking pages; None when the probe itself failed.
    pub active_vendors: Option<i64>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let active_vendors: Option<i64> =
        sqlx::query_scalar("SELECT COUNT(*) FROM vendors WHERE is_active = 1")
            .fetch_one(&state.db)
            .await
            .ok();

    Json(HealthResponse {
        status: if active_vendors.is_some() {
            "ok"
        } else {
            "degraded"
        },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        db_ok: active_vendors.is_some(),
        active_vendors,
    })
}
