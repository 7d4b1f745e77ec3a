//! Dashboard endpoints. All routes in this group sit behind the
//! X-Api-Key middleware, which puts the resolved `Vendor` into request
//! extensions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use std::sync::Arc;

use crate::booking::{self, BookingRequest, ClientRef};
use crate::error::BookingError;
use crate::models::*;
use crate::schedule::{self, validate_day};
use crate::AppState;

type Reject = (StatusCode, Json<ApiResponse<()>>);

fn bad_request(msg: &str) -> Reject {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(msg)))
}

fn not_found(msg: &str) -> Reject {
    (StatusCode::NOT_FOUND, Json(ApiResponse::error(msg)))
}

fn db_error(e: sqlx::Error) -> Reject {
    BookingError::Db(e).reject()
}

// ── Weekly schedule ──

/// GET /api/vendor/schedule
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
) -> Result<Json<ApiResponse<Vec<DaySchedule>>>, Reject> {
    let rows = sqlx::query_as::<_, WorkScheduleRow>(
        "SELECT id, vendor_id, day_of_week, start_time, end_time, breaks, is_working_day
         FROM work_schedules WHERE vendor_id = ? ORDER BY day_of_week ASC",
    )
    .bind(vendor.id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let mut days = Vec::with_capacity(rows.len());
    for row in rows {
        let breaks: Vec<BreakInput> = serde_json::from_str(&row.breaks)
            .map_err(|_| BookingError::InvalidScheduleFormat(row.breaks.clone()).reject())?;
        days.push(DaySchedule {
            day_of_week: row.day_of_week,
            start_time: row.start_time,
            end_time: row.end_time,
            breaks,
            is_working_day: row.is_working_day,
        });
    }
    Ok(Json(ApiResponse::success(days)))
}

/// PUT /api/vendor/schedule — replace the weekly pattern. The whole
/// body is validated before any row is written.
pub async fn put_schedule(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Json(body): Json<Vec<DaySchedule>>,
) -> Result<Json<ApiResponse<()>>, Reject> {
    for day in &body {
        if !(0..=6).contains(&day.day_of_week) {
            return Err(bad_request("День недели должен быть от 0 до 6"));
        }
        if day.is_working_day {
            let breaks: Vec<(String, String)> = day
                .breaks
                .iter()
                .map(|b| (b.start.clone(), b.end.clone()))
                .collect();
            validate_day(&day.start_time, &day.end_time, &breaks)
                .map_err(BookingError::reject)?;
        }
    }

    let mut tx = state.db.begin().await.map_err(db_error)?;
    for day in &body {
        let breaks_json = serde_json::to_string(&day.breaks).unwrap_or_else(|_| "[]".into());
        sqlx::query(
            "INSERT INTO work_schedules (vendor_id, day_of_week, start_time, end_time, breaks, is_working_day)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(vendor_id, day_of_week) DO UPDATE SET
               start_time = excluded.start_time,
               end_time = excluded.end_time,
               breaks = excluded.breaks,
               is_working_day = excluded.is_working_day",
        )
        .bind(vendor.id)
        .bind(day.day_of_week)
        .bind(&day.start_time)
        .bind(&day.end_time)
        .bind(&breaks_json)
        .bind(day.is_working_day)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    }
    tx.commit().await.map_err(db_error)?;

    tracing::info!("vendor {} updated weekly schedule ({} days)", vendor.id, body.len());
    Ok(Json(ApiResponse::success(())))
}

// ── Exceptions ──

#[derive(Debug, serde::Deserialize)]
pub struct ExceptionsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// GET /api/vendor/exceptions?from=&to=
pub async fn list_exceptions(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Query(query): Query<ExceptionsQuery>,
) -> Result<Json<ApiResponse<Vec<ScheduleExceptionRow>>>, Reject> {
    let from = query.from.unwrap_or_else(|| "0000-01-01".into());
    let to = query.to.unwrap_or_else(|| "9999-12-31".into());
    let rows = sqlx::query_as::<_, ScheduleExceptionRow>(
        "SELECT id, vendor_id, exception_date, exception_type, start_time, end_time, reason
         FROM schedule_exceptions
         WHERE vendor_id = ? AND exception_date BETWEEN ? AND ?
         ORDER BY exception_date ASC",
    )
    .bind(vendor.id)
    .bind(from)
    .bind(to)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;
    Ok(Json(ApiResponse::success(rows)))
}

/// PUT /api/vendor/exceptions — upsert by date. One exception per
/// vendor per date; a second write replaces the first.
pub async fn put_exception(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Json(body): Json<ExceptionInput>,
) -> Result<Json<ApiResponse<()>>, Reject> {
    if NaiveDate::parse_from_str(&body.exception_date, "%Y-%m-%d").is_err() {
        return Err(bad_request("Неверный формат даты"));
    }
    match body.exception_type.as_str() {
        schedule::EXCEPTION_DAY_OFF => {}
        schedule::EXCEPTION_CUSTOM_HOURS => {
            let (Some(start), Some(end)) = (&body.start_time, &body.end_time) else {
                return Err(BookingError::IncompleteException.reject());
            };
            validate_day(start, end, &[]).map_err(BookingError::reject)?;
        }
        _ => return Err(bad_request("Неизвестный тип исключения")),
    }

    sqlx::query(
        "INSERT INTO schedule_exceptions (vendor_id, exception_date, exception_type, start_time, end_time, reason)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(vendor_id, exception_date) DO UPDATE SET
           exception_type = excluded.exception_type,
           start_time = excluded.start_time,
           end_time = excluded.end_time,
           reason = excluded.reason",
    )
    .bind(vendor.id)
    .bind(&body.exception_date)
    .bind(&body.exception_type)
    .bind(&body.start_time)
    .bind(&body.end_time)
    .bind(&body.reason)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiResponse::success(())))
}

/// DELETE /api/vendor/exceptions/{date}
pub async fn delete_exception(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Path(date): Path<String>,
) -> Result<Json<ApiResponse<()>>, Reject> {
    let result = sqlx::query(
        "DELETE FROM schedule_exceptions WHERE vendor_id = ? AND exception_date = ?",
    )
    .bind(vendor.id)
    .bind(&date)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    if result.rows_affected() == 0 {
        return Err(not_found("Исключение не найдено"));
    }
    Ok(Json(ApiResponse::success(())))
}

// ── Services ──

/// GET /api/vendor/services — everything, including disabled.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
) -> Result<Json<ApiResponse<Vec<Service>>>, Reject> {
    let services = sqlx::query_as::<_, Service>(
        "SELECT id, vendor_id, name, description, price, duration_min, buffer_after_min,
                is_active, is_online_bookable, sort_order
         FROM services WHERE vendor_id = ? ORDER BY sort_order ASC, id ASC",
    )
    .bind(vendor.id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;
    Ok(Json(ApiResponse::success(services)))
}

/// POST /api/vendor/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<ApiResponse<i64>>, Reject> {
    if body.name.trim().is_empty() {
        return Err(bad_request("Укажите название услуги"));
    }
    if body.duration_min <= 0 || body.buffer_after_min.unwrap_or(0) < 0 {
        return Err(BookingError::InvalidServiceDuration.reject());
    }

    let id = sqlx::query(
        "INSERT INTO services (vendor_id, name, description, price, duration_min, buffer_after_min, is_online_bookable, sort_order)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(vendor.id)
    .bind(body.name.trim())
    .bind(body.description.as_deref().unwrap_or(""))
    .bind(body.price)
    .bind(body.duration_min)
    .bind(body.buffer_after_min.unwrap_or(0))
    .bind(body.is_online_bookable.unwrap_or(true))
    .bind(body.sort_order.unwrap_or(0))
    .execute(&state.db)
    .await
    .map_err(db_error)?
    .last_insert_rowid();

    Ok(Json(ApiResponse::success(id)))
}

/// PUT /api/vendor/services/{id} — partial update, absent fields keep
/// their value.
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<Json<ApiResponse<()>>, Reject> {
    if body.duration_min.is_some_and(|d| d <= 0) || body.buffer_after_min.is_some_and(|b| b < 0) {
        return Err(BookingError::InvalidServiceDuration.reject());
    }

    let result = sqlx::query(
        "UPDATE services SET
           name = COALESCE(?, name),
           description = COALESCE(?, description),
           price = COALESCE(?, price),
           duration_min = COALESCE(?, duration_min),
           buffer_after_min = COALESCE(?, buffer_after_min),
           is_active = COALESCE(?, is_active),
           is_online_bookable = COALESCE(?, is_online_bookable),
           sort_order = COALESCE(?, sort_order)
         WHERE id = ? AND vendor_id = ?",
    )
    .bind(&body.name)
    .bind(&body.description)
    .bind(body.price)
    .bind(body.duration_min)
    .bind(body.buffer_after_min)
    .bind(body.is_active)
    .bind(body.is_online_bookable)
    .bind(body.sort_order)
    .bind(id)
    .bind(vendor.id)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    if result.rows_affected() == 0 {
        return Err(not_found("Услуга не найдена"));
    }
    Ok(Json(ApiResponse::success(())))
}

/// DELETE /api/vendor/services/{id}
///
/// Services referenced by bookings are disabled instead of deleted so
/// history stays readable.
pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, Reject> {
    let owned: Option<i64> =
        sqlx::query_scalar("SELECT id FROM services WHERE id = ? AND vendor_id = ?")
            .bind(id)
            .bind(vendor.id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error)?;
    if owned.is_none() {
        return Err(not_found("Услуга не найдена"));
    }

    let referenced: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE service_id = ?")
            .bind(id)
            .fetch_one(&state.db)
            .await
            .map_err(db_error)?;

    if referenced > 0 {
        sqlx::query("UPDATE services SET is_active = 0, is_online_bookable = 0 WHERE id = ?")
            .bind(id)
            .execute(&state.db)
            .await
            .map_err(db_error)?;
        Ok(Json(ApiResponse::success("disabled")))
    } else {
        sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&state.db)
            .await
            .map_err(db_error)?;
        Ok(Json(ApiResponse::success("deleted")))
    }
}

// ── Bookings ──

const BOOKING_DETAIL_SELECT: &str =
    "SELECT b.id, s.name AS service_name, s.price AS service_price,
            b.start_at, b.end_at, c.name AS client_name, c.phone AS client_phone,
            b.status, b.source, b.notes, b.created_at
     FROM bookings b
     JOIN services s ON s.id = b.service_id
     JOIN clients c ON c.id = b.client_id";

/// GET /api/vendor/bookings?date= | ?from=&to=
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<ApiResponse<Vec<BookingDetail>>>, Reject> {
    let (from, to) = match (&query.date, &query.from, &query.to) {
        (Some(date), _, _) => (date.clone(), date.clone()),
        (None, Some(from), Some(to)) => (from.clone(), to.clone()),
        _ => return Err(bad_request("Укажите date либо from и to")),
    };
    if NaiveDate::parse_from_str(&from, "%Y-%m-%d").is_err()
        || NaiveDate::parse_from_str(&to, "%Y-%m-%d").is_err()
    {
        return Err(bad_request("Неверный формат даты"));
    }

    let sql = format!(
        "{BOOKING_DETAIL_SELECT}
         WHERE b.vendor_id = ? AND date(b.start_at) BETWEEN ? AND ?
         ORDER BY b.start_at ASC"
    );
    let bookings = sqlx::query_as::<_, BookingDetail>(&sql)
        .bind(vendor.id)
        .bind(&from)
        .bind(&to)
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(ApiResponse::success(bookings)))
}

/// POST /api/vendor/bookings — manual entry (walk-in, phone call).
/// Skips lead-time and online-visibility rules but not the overlap
/// check.
pub async fn create_manual_booking(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Json(body): Json<ManualBookingRequest>,
) -> Result<Json<ApiResponse<BookingCreated>>, Reject> {
    let date = NaiveDate::parse_from_str(&body.date, "%Y-%m-%d")
        .map_err(|_| bad_request("Неверный формат даты"))?;
    let time = schedule::TimeOfDay::parse(&body.time)
        .map_err(|_| bad_request("Неверный формат времени"))?;

    let client = match (body.client_id, &body.client_name, &body.client_phone) {
        (Some(id), _, _) => ClientRef::Existing(id),
        (None, Some(name), Some(phone)) => ClientRef::ByPhone {
            name: name.trim().to_string(),
            phone: phone.trim().to_string(),
            telegram_id: None,
        },
        _ => return Err(BookingError::InvalidClient.reject()),
    };

    let start_at = date.and_hms_opt(0, 0, 0).unwrap_or_default()
        + chrono::Duration::minutes(time.minutes());

    let created = booking::create_booking(
        &state.db,
        &state.locks,
        &vendor,
        BookingRequest {
            service_id: body.service_id,
            start_at,
            client,
            source: BookingSource::Manual,
            notes: body.notes,
        },
    )
    .await
    .map_err(BookingError::reject)?;

    Ok(Json(ApiResponse::success(BookingCreated {
        booking_id: created.id,
        start_at: created.start_at,
        end_at: created.end_at,
        status: created.status,
    })))
}

/// POST /api/vendor/bookings/{id}/status — drive the state machine.
pub async fn set_booking_status(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
    Path(id): Path<i64>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<ApiResponse<()>>, Reject> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM bookings WHERE id = ? AND vendor_id = ?")
            .bind(id)
            .bind(vendor.id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error)?;
    let current = current.ok_or_else(|| not_found("Запись не найдена"))?;

    let from = BookingStatus::parse(&current).ok_or_else(|| {
        tracing::error!("booking {} has unknown status '{}'", id, current);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("Что-то пошло не так. Попробуйте позже.")),
        )
    })?;

    if !from.can_transition_to(body.status) {
        return Err((
            StatusCode::CONFLICT,
            Json(ApiResponse::error(format!(
                "Нельзя перевести запись из «{}» в «{}»",
                from.as_str(),
                body.status.as_str()
            ))),
        ));
    }

    // Compare-and-swap on the status read above; a concurrent
    // transition makes this a no-op instead of a silent overwrite.
    let cancelled_at = matches!(body.status, BookingStatus::Cancelled);
    let result = sqlx::query(
        "UPDATE bookings SET status = ?,
           cancelled_at = CASE WHEN ? THEN datetime('now') ELSE cancelled_at END
         WHERE id = ? AND status = ?",
    )
    .bind(body.status.as_str())
    .bind(cancelled_at)
    .bind(id)
    .bind(from.as_str())
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    if result.rows_affected() == 0 {
        return Err((
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Статус записи уже изменился, обновите список")),
        ));
    }

    tracing::info!(
        "booking {} status: {} -> {} (vendor {})",
        id,
        from.as_str(),
        body.status.as_str(),
        vendor.id
    );

    notify_client_of_status(&state, id, body.status).await;
    Ok(Json(ApiResponse::success(())))
}

/// Tell the client about a confirm/cancel when we know their Telegram.
/// Best effort: a blocked bot or missing id is not an error.
async fn notify_client_of_status(state: &AppState, booking_id: i64, status: BookingStatus) {
    let text_suffix = match status {
        BookingStatus::Confirmed => "подтверждена ✅",
        BookingStatus::Cancelled => "отменена мастером 😔 Выберите другое время.",
        _ => return,
    };
    if state.bot_token.is_empty() {
        return;
    }

    let row: Option<(Option<i64>, String)> = sqlx::query_as(
        "SELECT c.telegram_id, b.start_at
         FROM bookings b JOIN clients c ON c.id = b.client_id
         WHERE b.id = ?",
    )
    .bind(booking_id)
    .fetch_optional(&state.db)
    .await
    .unwrap_or(None);

    if let Some((Some(telegram_id), start_at)) = row {
        let text = format!(
            "Ваша запись на {} {}",
            start_at.replace('T', " в "),
            text_suffix
        );
        crate::handlers::public::send_telegram(&state.bot_token, telegram_id, &text).await;
    }
}

// ── Clients ──

/// GET /api/vendor/clients
pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    Extension(vendor): Extension<Vendor>,
) -> Result<Json<ApiResponse<Vec<Client>>>, Reject> {
    let clients = sqlx::query_as::<_, Client>(
        "SELECT id, vendor_id, name, phone, telegram_id, total_bookings
         FROM clients WHERE vendor_id = ?
         ORDER BY total_bookings DESC, name ASC",
    )
    .bind(vendor.id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;
    Ok(Json(ApiResponse::success(clients)))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::VendorLocks;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::time::Instant;

    async fn test_state() -> Arc<AppState> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        Arc::new(AppState {
            db: pool,
            bot_token: String::new(),
            started_at: Instant::now(),
            locks: VendorLocks::new(),
        })
    }

    async fn seed_vendor(pool: &SqlitePool) -> Vendor {
        sqlx::query("INSERT INTO vendors (slug, name, api_key_hash) VALUES ('studio', 'studio', 'test')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query_as::<_, Vendor>(
            "SELECT id, slug, name, phone, tz_offset_min, slot_step_min, min_lead_min,
                    max_advance_days, auto_confirm, notify_chat_id, is_active
             FROM vendors WHERE slug = 'studio'",
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn seed_booking(pool: &SqlitePool, vendor_id: i64, status: &str) -> i64 {
        sqlx::query("INSERT INTO services (vendor_id, name, duration_min) VALUES (?, 'Стрижка', 60)")
            .bind(vendor_id)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO clients (vendor_id, name, phone) VALUES (?, 'Аня', '+79990001122')")
            .bind(vendor_id)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO bookings (vendor_id, client_id, service_id, start_at, end_at, status, source)
             SELECT ?, c.id, s.id, '2026-03-02T12:00:00', '2026-03-02T13:00:00', ?, 'web'
             FROM clients c, services s WHERE c.vendor_id = ? AND s.vendor_id = ?",
        )
        .bind(vendor_id)
        .bind(status)
        .bind(vendor_id)
        .bind(vendor_id)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    async fn transition(
        state: &Arc<AppState>,
        vendor: &Vendor,
        id: i64,
        status: BookingStatus,
    ) -> Result<Json<ApiResponse<()>>, Reject> {
        set_booking_status(
            State(state.clone()),
            Extension(vendor.clone()),
            Path(id),
            Json(SetStatusRequest { status }),
        )
        .await
    }

    #[tokio::test]
    async fn test_transition_out_of_terminal_state_is_conflict() {
        let state = test_state().await;
        let vendor = seed_vendor(&state.db).await;
        let id = seed_booking(&state.db, vendor.id, "confirmed").await;

        transition(&state, &vendor, id, BookingStatus::Completed)
            .await
            .unwrap();
        let err = transition(&state, &vendor, id, BookingStatus::Cancelled)
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);

        let status: String = sqlx::query_scalar("SELECT status FROM bookings WHERE id = ?")
            .bind(id)
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(status, "completed");
    }

    #[tokio::test]
    async fn test_stale_status_write_is_a_noop() {
        // The UPDATE only fires when the row still holds the status the
        // handler read; a write racing on an already-moved row touches
        // nothing.
        let state = test_state().await;
        let vendor = seed_vendor(&state.db).await;
        let id = seed_booking(&state.db, vendor.id, "cancelled").await;

        let result = sqlx::query(
            "UPDATE bookings SET status = 'completed' WHERE id = ? AND status = 'confirmed'",
        )
        .bind(id)
        .execute(&state.db)
        .await
        .unwrap();
        assert_eq!(result.rows_affected(), 0);

        let status: String = sqlx::query_scalar("SELECT status FROM bookings WHERE id = ?")
            .bind(id)
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(status, "cancelled");
    }
}
