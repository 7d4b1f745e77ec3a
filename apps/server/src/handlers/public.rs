//! Public booking-page endpoints, scoped by vendor slug. No auth: the
//! slug is the entry point a client gets via link or QR code.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Days, Months, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;

use crate::booking::{self, vendor_now, BookingRequest, ClientRef};
use crate::error::BookingError;
use crate::models::*;
use crate::schedule::{self, parse_breaks, TimeOfDay};
use crate::slots::{generate_slots, intervals_overlap, Interval, SlotRequest};
use crate::AppState;

type Reject = (StatusCode, Json<ApiResponse<()>>);

fn bad_request(msg: &str) -> Reject {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(msg)))
}

fn not_found(msg: &str) -> Reject {
    (StatusCode::NOT_FOUND, Json(ApiResponse::error(msg)))
}

// ── Shared lookups ──

pub async fn vendor_by_slug(db: &sqlx::SqlitePool, slug: &str) -> Result<Vendor, Reject> {
    sqlx::query_as::<_, Vendor>(
        "SELECT id, slug, name, phone, tz_offset_min, slot_step_min, min_lead_min,
                max_advance_days, auto_confirm, notify_chat_id, is_active
         FROM vendors WHERE slug = ? AND is_active = 1",
    )
    .bind(slug)
    .fetch_optional(db)
    .await
    .map_err(|e| {
        tracing::error!("vendor_by_slug: {}", e);
        BookingError::Db(e).reject()
    })?
    .ok_or_else(|| not_found("Страница не найдена"))
}

fn parse_date(s: &str) -> Result<NaiveDate, Reject> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| bad_request("Неверный формат даты"))
}

async fn bookable_service(
    db: &sqlx::SqlitePool,
    vendor_id: i64,
    service_id: i64,
) -> Result<Service, BookingError> {
    sqlx::query_as::<_, Service>(
        "SELECT id, vendor_id, name, description, price, duration_min, buffer_after_min,
                is_active, is_online_bookable, sort_order
         FROM services
         WHERE id = ? AND vendor_id = ? AND is_active = 1 AND is_online_bookable = 1",
    )
    .bind(service_id)
    .bind(vendor_id)
    .fetch_optional(db)
    .await?
    .ok_or(BookingError::ServiceNotFound)
}

fn day_window(date: NaiveDate) -> Interval {
    Interval {
        start: date.and_hms_opt(0, 0, 0).unwrap_or_default(),
        end: (date + Days::new(1)).and_hms_opt(0, 0, 0).unwrap_or_default(),
    }
}

/// The slot list for one date, bounded by the vendor's booking
/// horizon. Dates in the past or beyond `max_advance_days` offer
/// nothing.
async fn offered_slots(
    db: &sqlx::SqlitePool,
    vendor: &Vendor,
    service: &Service,
    date: NaiveDate,
) -> Result<Vec<TimeOfDay>, BookingError> {
    let now = vendor_now(vendor.tz_offset_min);
    let today = now.date();
    if date < today || date > today + Days::new(vendor.max_advance_days.max(0) as u64) {
        return Ok(Vec::new());
    }

    let Some((hours, breaks)) = schedule::effective_hours(db, vendor.id, date).await? else {
        return Ok(Vec::new());
    };
    let busy = booking::active_intervals(db, vendor.id, &day_window(date)).await?;

    generate_slots(&SlotRequest {
        date,
        hours: Some(hours),
        breaks: &breaks,
        busy: &busy,
        duration_min: service.duration_min,
        buffer_after_min: service.buffer_after_min,
        step_min: vendor.slot_step_min,
        now,
        min_lead_min: vendor.min_lead_min,
    })
}

// ── Endpoints ──

/// GET /api/public/{slug} — the booking-page header card.
pub async fn vendor_card(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<VendorCard>>, Reject> {
    let vendor = vendor_by_slug(&state.db, &slug).await?;
    Ok(Json(ApiResponse::success(VendorCard {
        slug: vendor.slug,
        name: vendor.name,
        phone: vendor.phone,
        slot_step_min: vendor.slot_step_min,
        min_lead_min: vendor.min_lead_min,
        max_advance_days: vendor.max_advance_days,
    })))
}

/// GET /api/public/{slug}/services — what a client may book online.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<Vec<Service>>>, Reject> {
    let vendor = vendor_by_slug(&state.db, &slug).await?;
    let services = sqlx::query_as::<_, Service>(
        "SELECT id, vendor_id, name, description, price, duration_min, buffer_after_min,
                is_active, is_online_bookable, sort_order
         FROM services
         WHERE vendor_id = ? AND is_active = 1 AND is_online_bookable = 1
         ORDER BY sort_order ASC, id ASC",
    )
    .bind(vendor.id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| BookingError::Db(e).reject())?;

    Ok(Json(ApiResponse::success(services)))
}

/// GET /api/public/{slug}/slots?service_id=N&date=YYYY-MM-DD
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<ApiResponse<SlotsResponse>>, Reject> {
    let vendor = vendor_by_slug(&state.db, &slug).await?;
    let date = parse_date(&query.date)?;
    let service = bookable_service(&state.db, vendor.id, query.service_id)
        .await
        .map_err(BookingError::reject_public)?;

    let slots = offered_slots(&state.db, &vendor, &service, date)
        .await
        .map_err(BookingError::reject_public)?;

    Ok(Json(ApiResponse::success(SlotsResponse {
        date: query.date,
        slots: slots.iter().map(TimeOfDay::format).collect(),
    })))
}

/// GET /api/public/{slug}/days?service_id=N&year=2026&month=3
///
/// Month view for the date picker. One bookings query for the whole
/// month; schedule rows and exceptions likewise fetched once.
pub async fn month_days(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<ApiResponse<Vec<CalendarDay>>>, Reject> {
    let vendor = vendor_by_slug(&state.db, &slug).await?;
    let service = bookable_service(&state.db, vendor.id, query.service_id)
        .await
        .map_err(BookingError::reject_public)?;

    let month_start = NaiveDate::from_ymd_opt(query.year, query.month, 1)
        .ok_or_else(|| bad_request("Неверный месяц"))?;
    let month_end = month_start + Months::new(1);

    let weekly: HashMap<i64, WorkScheduleRow> = sqlx::query_as::<_, WorkScheduleRow>(
        "SELECT id, vendor_id, day_of_week, start_time, end_time, breaks, is_working_day
         FROM work_schedules WHERE vendor_id = ?",
    )
    .bind(vendor.id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| BookingError::Db(e).reject())?
    .into_iter()
    .map(|row| (row.day_of_week, row))
    .collect();

    let exceptions: HashMap<String, ScheduleExceptionRow> =
        sqlx::query_as::<_, ScheduleExceptionRow>(
            "SELECT id, vendor_id, exception_date, exception_type, start_time, end_time, reason
             FROM schedule_exceptions
             WHERE vendor_id = ? AND exception_date >= ? AND exception_date < ?",
        )
        .bind(vendor.id)
        .bind(month_start.format("%Y-%m-%d").to_string())
        .bind(month_end.format("%Y-%m-%d").to_string())
        .fetch_all(&state.db)
        .await
        .map_err(|e| BookingError::Db(e).reject())?
        .into_iter()
        .map(|row| (row.exception_date.clone(), row))
        .collect();

    let month_window = Interval {
        start: month_start.and_hms_opt(0, 0, 0).unwrap_or_default(),
        end: month_end.and_hms_opt(0, 0, 0).unwrap_or_default(),
    };
    let month_busy = booking::active_intervals(&state.db, vendor.id, &month_window)
        .await
        .map_err(BookingError::reject_public)?;

    let now = vendor_now(vendor.tz_offset_min);
    let today = now.date();
    let horizon = today + Days::new(vendor.max_advance_days.max(0) as u64);

    let mut days = Vec::new();
    let mut date = month_start;
    while date < month_end {
        let key = date.format("%Y-%m-%d").to_string();
        let bookable = if date < today || date > horizon {
            false
        } else {
            let resolved = schedule::resolve_effective_hours(
                exceptions.get(&key),
                weekly.get(&schedule::day_of_week(date)),
            )
            .map_err(BookingError::reject_public)?;

            match resolved {
                None => false,
                Some(hours) => {
                    let breaks = match (exceptions.get(&key), weekly.get(&schedule::day_of_week(date))) {
                        (None, Some(row)) => parse_breaks(&row.breaks).map_err(BookingError::reject_public)?,
                        _ => Vec::new(),
                    };
                    let window = day_window(date);
                    let busy: Vec<Interval> = month_busy
                        .iter()
                        .filter(|b| intervals_overlap(b, &window))
                        .copied()
                        .collect();
                    let slots = generate_slots(&SlotRequest {
                        date,
                        hours: Some(hours),
                        breaks: &breaks,
                        busy: &busy,
                        duration_min: service.duration_min,
                        buffer_after_min: service.buffer_after_min,
                        step_min: vendor.slot_step_min,
                        now,
                        min_lead_min: vendor.min_lead_min,
                    })
                    .map_err(BookingError::reject_public)?;
                    !slots.is_empty()
                }
            }
        };
        days.push(CalendarDay { date: key, bookable });
        date = date + Days::new(1);
    }

    Ok(Json(ApiResponse::success(days)))
}

/// POST /api/public/{slug}/bookings
///
/// The requested time must be one of the currently offered slots; the
/// final overlap check happens inside the booking transaction.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(body): Json<CreateBookingRequest>,
) -> Result<Json<ApiResponse<BookingCreated>>, Reject> {
    let vendor = vendor_by_slug(&state.db, &slug).await?;
    let date = parse_date(&body.date)?;
    let time = TimeOfDay::parse(&body.time).map_err(|_| bad_request("Неверный формат времени"))?;
    if body.client_name.trim().is_empty() {
        return Err(bad_request("Укажите имя"));
    }

    // Only client-facing sources come through this endpoint
    let source = match body.source {
        Some(s @ (BookingSource::Web | BookingSource::Telegram | BookingSource::Instagram)) => s,
        _ => BookingSource::Web,
    };

    let service = bookable_service(&state.db, vendor.id, body.service_id)
        .await
        .map_err(BookingError::reject_public)?;

    // Membership in the offered list enforces working hours, breaks
    // and step alignment in one move.
    let offered = offered_slots(&state.db, &vendor, &service, date)
        .await
        .map_err(BookingError::reject_public)?;
    if !offered.contains(&time) {
        return Err(BookingError::SlotUnavailable.reject());
    }

    let start_at = date
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        + chrono::Duration::minutes(time.minutes());

    let created = booking::create_booking(
        &state.db,
        &state.locks,
        &vendor,
        BookingRequest {
            service_id: service.id,
            start_at,
            client: ClientRef::ByPhone {
                name: body.client_name.trim().to_string(),
                phone: body.client_phone.trim().to_string(),
                telegram_id: body.telegram_id,
            },
            source,
            notes: None,
        },
    )
    .await
    .map_err(BookingError::reject_public)?;

    notify_new_booking(&state, &vendor, &service, &created, &body.client_name, &body.client_phone)
        .await;

    Ok(Json(ApiResponse::success(BookingCreated {
        booking_id: created.id,
        start_at: created.start_at,
        end_at: created.end_at,
        status: created.status,
    })))
}

// ── Vendor notification ──

/// Ping the vendor's Telegram chat about a fresh booking. Failure is
/// logged, never surfaced to the client.
async fn notify_new_booking(
    state: &AppState,
    vendor: &Vendor,
    service: &Service,
    created: &Booking,
    client_name: &str,
    client_phone: &str,
) {
    let (Some(chat_id), false) = (vendor.notify_chat_id, state.bot_token.is_empty()) else {
        return;
    };
    let status_line = if created.status == "pending" {
        "\n⏳ Ожидает подтверждения"
    } else {
        ""
    };
    let text = format!(
        "🗓 Новая запись\n\n💅 {}\n📅 {}\n👤 {}, {}{}",
        service.name,
        created.start_at.replace('T', " в "),
        client_name.trim(),
        client_phone.trim(),
        status_line,
    );
    send_telegram(&state.bot_token, chat_id, &text).await;
}

pub async fn send_telegram(bot_token: &str, chat_id: i64, text: &str) {
    let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);
    let client = reqwest::Client::new();
    if let Err(e) = client
        .post(&url)
        .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
        .send()
        .await
    {
        tracing::error!("telegram notify failed: {}", e);
    }
}
