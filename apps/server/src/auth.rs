use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::models::{ApiResponse, Vendor};
use crate::AppState;

/// Keys are stored as hex SHA-256 digests; the plaintext is handed to
/// the vendor once at provisioning and never persisted.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.trim().as_bytes()))
}

pub async fn vendor_by_api_key(
    db: &sqlx::SqlitePool,
    key: &str,
) -> Result<Option<Vendor>, sqlx::Error> {
    sqlx::query_as::<_, Vendor>(
        "SELECT id, slug, name, phone, tz_offset_min, slot_step_min, min_lead_min,
                max_advance_days, auto_confirm, notify_chat_id, is_active
         FROM vendors WHERE api_key_hash = ? AND is_active = 1",
    )
    .bind(hash_api_key(key))
    .fetch_optional(db)
    .await
}

fn unauthorized(msg: &str) -> (StatusCode, Json<ApiResponse<()>>) {
    (StatusCode::UNAUTHORIZED, Json(ApiResponse::error(msg)))
}

/// Middleware for the `/api/vendor/*` group. Resolves the vendor from
/// the `X-Api-Key` header and stores it in request extensions, so
/// handlers take `Extension<Vendor>`.
pub async fn require_vendor(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("Требуется API-ключ"))?;

    let vendor = vendor_by_api_key(&state.db, key)
        .await
        .map_err(|e| {
            tracing::error!("api key lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Что-то пошло не так. Попробуйте позже.")),
            )
        })?
        .ok_or_else(|| {
            tracing::warn!("rejected unknown api key");
            unauthorized("Неверный API-ключ")
        })?;

    req.extensions_mut().insert(vendor);
    Ok(next.run(req).await)
}
