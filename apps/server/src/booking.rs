//! The booking transaction: the only code path that writes bookings.
//!
//! Every entry adapter (web form, dashboard, Telegram bot) ends up
//! here. The slot list shown to the user is advisory and may be stale;
//! the overlap re-check in `create_booking` is the source of truth.
//!
//! Mutual exclusion: SQLite has no range-exclusion constraints, so the
//! re-check + insert run inside one sqlx transaction while holding a
//! per-vendor async mutex. All writers live in this process (the bot
//! goes through the HTTP API), which makes the advisory lock sufficient.

use chrono::{Duration, NaiveDateTime, Utc};
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::BookingError;
use crate::models::{Booking, BookingSource, BookingStatus, Service, Vendor};
use crate::slots::Interval;

/// Storage format for booking timestamps. Fixed-width, so string
/// comparison in SQL orders chronologically.
pub const DT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_dt(dt: NaiveDateTime) -> String {
    dt.format(DT_FORMAT).to_string()
}

pub fn parse_dt(s: &str) -> Result<NaiveDateTime, BookingError> {
    NaiveDateTime::parse_from_str(s, DT_FORMAT)
        .map_err(|_| BookingError::InvalidScheduleFormat(s.to_string()))
}

/// Current time on the vendor's wall clock (fixed UTC offset).
pub fn vendor_now(tz_offset_min: i64) -> NaiveDateTime {
    (Utc::now() + Duration::minutes(tz_offset_min)).naive_utc()
}

// ── Per-vendor write serialization ──

/// One async mutex per vendor id. Held across the availability
/// re-check and the insert so two concurrent requests can't both
/// observe "no conflict" for the same interval.
#[derive(Default)]
pub struct VendorLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl VendorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_vendor(&self, vendor_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(vendor_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// ── Request ──

#[derive(Debug, Clone)]
pub enum ClientRef {
    /// An existing client id (dashboard manual entry).
    Existing(i64),
    /// Resolve-or-create by phone, unique per vendor.
    ByPhone {
        name: String,
        phone: String,
        telegram_id: Option<i64>,
    },
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub service_id: i64,
    pub start_at: NaiveDateTime,
    pub client: ClientRef,
    pub source: BookingSource,
    pub notes: Option<String>,
}

// ── Read helpers shared with the slot endpoints ──

/// Intervals of {pending, confirmed} bookings intersecting the window.
pub async fn active_intervals(
    db: &SqlitePool,
    vendor_id: i64,
    window: &Interval,
) -> Result<Vec<Interval>, BookingError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT start_at, end_at FROM bookings
         WHERE vendor_id = ? AND status IN ('pending', 'confirmed')
           AND start_at < ? AND end_at > ?
         ORDER BY start_at ASC",
    )
    .bind(vendor_id)
    .bind(format_dt(window.end))
    .bind(format_dt(window.start))
    .fetch_all(db)
    .await?;

    let mut intervals = Vec::with_capacity(rows.len());
    for (start, end) in rows {
        intervals.push(Interval {
            start: parse_dt(&start)?,
            end: parse_dt(&end)?,
        });
    }
    Ok(intervals)
}

pub async fn fetch_booking(db: &SqlitePool, id: i64) -> Result<Booking, BookingError> {
    let booking = sqlx::query_as::<_, Booking>(
        "SELECT id, vendor_id, client_id, service_id, start_at, end_at,
                status, source, notes, created_at, cancelled_at
         FROM bookings WHERE id = ?",
    )
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(booking)
}

// ── The transaction ──

pub async fn create_booking(
    db: &SqlitePool,
    locks: &VendorLocks,
    vendor: &Vendor,
    req: BookingRequest,
) -> Result<Booking, BookingError> {
    // 1. Resolve the service. Manual/phone entries may book services
    //    that are hidden from online booking.
    let online_only = !matches!(req.source, BookingSource::Manual | BookingSource::Phone);
    let service = sqlx::query_as::<_, Service>(
        "SELECT id, vendor_id, name, description, price, duration_min, buffer_after_min,
                is_active, is_online_bookable, sort_order
         FROM services WHERE id = ? AND vendor_id = ? AND is_active = 1",
    )
    .bind(req.service_id)
    .bind(vendor.id)
    .fetch_optional(db)
    .await?
    .ok_or(BookingError::ServiceNotFound)?;

    if online_only && !service.is_online_bookable {
        return Err(BookingError::ServiceNotFound);
    }
    if service.duration_min <= 0 || service.buffer_after_min < 0 {
        return Err(BookingError::InvalidServiceDuration);
    }

    // 2. End of the occupied interval: duration plus trailing buffer.
    let end_at = req.start_at
        + Duration::minutes(service.duration_min + service.buffer_after_min);

    // 3. Lead time. The dashboard may backfill walk-ins, online
    //    sources may not book the immediate future.
    if online_only {
        let earliest = vendor_now(vendor.tz_offset_min) + Duration::minutes(vendor.min_lead_min);
        if req.start_at < earliest {
            return Err(BookingError::PastOrTooSoon);
        }
    }

    // 4. Serialize writers for this vendor, then re-check + insert
    //    atomically. The guard must outlive the commit.
    let lock = locks.for_vendor(vendor.id);
    let _guard = lock.lock().await;

    let mut tx = db.begin().await?;

    let client_id = match &req.client {
        ClientRef::Existing(id) => {
            // Cross-vendor client ids are invalid by ownership rules
            let owned: Option<i64> =
                sqlx::query_scalar("SELECT id FROM clients WHERE id = ? AND vendor_id = ?")
                    .bind(id)
                    .bind(vendor.id)
                    .fetch_optional(&mut *tx)
                    .await?;
            owned.ok_or(BookingError::InvalidClient)?
        }
        ClientRef::ByPhone {
            name,
            phone,
            telegram_id,
        } => {
            let phone = phone.trim();
            if phone.is_empty() {
                return Err(BookingError::InvalidClient);
            }
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT id FROM clients WHERE vendor_id = ? AND phone = ?")
                    .bind(vendor.id)
                    .bind(phone)
                    .fetch_optional(&mut *tx)
                    .await?;
            match existing {
                Some(id) => {
                    if telegram_id.is_some() {
                        sqlx::query(
                            "UPDATE clients SET telegram_id = ? WHERE id = ? AND telegram_id IS NULL",
                        )
                        .bind(telegram_id)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    }
                    id
                }
                None => sqlx::query(
                    "INSERT INTO clients (vendor_id, name, phone, telegram_id) VALUES (?, ?, ?, ?)",
                )
                .bind(vendor.id)
                .bind(name)
                .bind(phone)
                .bind(telegram_id)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid(),
            }
        }
    };

    // 5. Authoritative overlap check against active bookings. The
    //    advisory slot list may be stale by now.
    let conflicts: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings
         WHERE vendor_id = ? AND status IN ('pending', 'confirmed')
           AND start_at < ? AND end_at > ?",
    )
    .bind(vendor.id)
    .bind(format_dt(end_at))
    .bind(format_dt(req.start_at))
    .fetch_one(&mut *tx)
    .await?;
    if conflicts > 0 {
        return Err(BookingError::SlotUnavailable);
    }

    // 6. Insert. Immediate confirmation unless the vendor wants to
    //    approve requests manually.
    let status = if vendor.auto_confirm {
        BookingStatus::Confirmed
    } else {
        BookingStatus::Pending
    };
    let booking_id = sqlx::query(
        "INSERT INTO bookings (vendor_id, client_id, service_id, start_at, end_at, status, source, notes)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(vendor.id)
    .bind(client_id)
    .bind(service.id)
    .bind(format_dt(req.start_at))
    .bind(format_dt(end_at))
    .bind(status.as_str())
    .bind(req.source.as_str())
    .bind(&req.notes)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    // Counter bump is best-effort bookkeeping, but it rides the same
    // transaction for free.
    sqlx::query("UPDATE clients SET total_bookings = total_bookings + 1 WHERE id = ?")
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        "booking {} created: vendor={} service={} start={} source={}",
        booking_id,
        vendor.id,
        service.id,
        format_dt(req.start_at),
        req.source.as_str()
    );

    fetch_booking(db, booking_id).await
}

// ── Tests ──
