use serde::{Deserialize, Serialize};

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vendor {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub phone: Option<String>,
    /// Fixed UTC offset of the vendor's wall clock, in minutes.
    pub tz_offset_min: i64,
    pub slot_step_min: i64,
    pub min_lead_min: i64,
    pub max_advance_days: i64,
    pub auto_confirm: bool,
    pub notify_chat_id: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub vendor_id: i64,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub duration_min: i64,
    pub buffer_after_min: i64,
    pub is_active: bool,
    pub is_online_bookable: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: i64,
    pub vendor_id: i64,
    pub name: String,
    pub phone: String,
    pub telegram_id: Option<i64>,
    pub total_bookings: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    pub id: i64,
    pub vendor_id: i64,
    pub client_id: i64,
    pub service_id: i64,
    pub start_at: String,
    pub end_at: String,
    pub status: String,
    pub source: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub cancelled_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkScheduleRow {
    pub id: i64,
    pub vendor_id: i64,
    pub day_of_week: i64,
    pub start_time: String,
    pub end_time: String,
    /// JSON array of {"start": "HH:MM", "end": "HH:MM"}.
    pub breaks: String,
    pub is_working_day: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduleExceptionRow {
    pub id: i64,
    pub vendor_id: i64,
    pub exception_date: String,
    pub exception_type: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub reason: Option<String>,
}

// ── Booking status state machine ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }

    /// Only these occupy a slot for overlap purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// cancelled/completed/no_show are terminal; pending can only be
    /// confirmed or cancelled, confirmed can close out any way.
    pub fn can_transition_to(&self, to: BookingStatus) -> bool {
        match (self, to) {
            (Self::Pending, Self::Confirmed) => true,
            (Self::Pending, Self::Cancelled) => true,
            (Self::Confirmed, Self::Cancelled) => true,
            (Self::Confirmed, Self::Completed) => true,
            (Self::Confirmed, Self::NoShow) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingSource {
    Web,
    Telegram,
    Instagram,
    Manual,
    Phone,
}

impl BookingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Telegram => "telegram",
            Self::Instagram => "instagram",
            Self::Manual => "manual",
            Self::Phone => "phone",
        }
    }
}

// ── API request/response types ──

#[derive(Debug, Serialize)]
pub struct VendorCard {
    pub slug: String,
    pub name: String,
    pub phone: Option<String>,
    pub slot_step_min: i64,
    pub min_lead_min: i64,
    pub max_advance_days: i64,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub service_id: i64,
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub date: String,
    pub slots: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub service_id: i64,
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Serialize)]
pub struct CalendarDay {
    pub date: String,
    pub bookable: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: i64,
    pub date: String,
    pub time: String,
    pub client_name: String,
    pub client_phone: String,
    #[serde(default)]
    pub source: Option<BookingSource>,
    #[serde(default)]
    pub telegram_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct BookingCreated {
    pub booking_id: i64,
    pub start_at: String,
    pub end_at: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ManualBookingRequest {
    pub service_id: i64,
    pub date: String,
    pub time: String,
    pub client_id: Option<i64>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: BookingStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DaySchedule {
    pub day_of_week: i64,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub breaks: Vec<BreakInput>,
    pub is_working_day: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BreakInput {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub struct ExceptionInput {
    pub exception_date: String,
    pub exception_type: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub duration_min: i64,
    pub buffer_after_min: Option<i64>,
    pub is_online_bookable: Option<bool>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub duration_min: Option<i64>,
    pub buffer_after_min: Option<i64>,
    pub is_active: Option<bool>,
    pub is_online_bookable: Option<bool>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BookingDetail {
    pub id: i64,
    pub service_name: String,
    pub service_price: i64,
    pub start_at: String,
    pub end_at: String,
    pub client_name: String,
    pub client_phone: String,
    pub status: String,
    pub source: String,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Tests ──
