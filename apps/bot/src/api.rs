//! HTTP client for the booking server's public API. The bot never
//! writes bookings directly: going through the API keeps all conflict
//! checks in one place.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendorCard {
    pub slug: String,
    pub name: String,
    pub max_advance_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceInfo {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub duration_min: i64,
}

#[derive(Debug, Deserialize)]
pub struct SlotsResponse {
    pub date: String,
    pub slots: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarDay {
    pub date: String,
    pub bookable: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateBooking<'a> {
    pub service_id: i64,
    pub date: &'a str,
    pub time: &'a str,
    pub client_name: &'a str,
    pub client_phone: &'a str,
    pub source: &'a str,
    pub telegram_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct BookingCreated {
    pub booking_id: i64,
    pub start_at: String,
    pub status: String,
}

/// Either a transport/server failure or a rejection the user should
/// see (slot taken, lead time, ...).
#[derive(Debug)]
pub enum ApiError {
    Rejected(String),
    Unavailable(anyhow::Error),
}

impl ApiError {
    /// Text safe to show in the chat.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected(msg) => msg.clone(),
            ApiError::Unavailable(_) => "Что-то пошло не так. Попробуйте позже.".into(),
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let envelope: Envelope<T> = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Unavailable(e.into()))?
            .json()
            .await
            .map_err(|e| ApiError::Unavailable(e.into()))?;
        unwrap_envelope(envelope)
    }

    pub async fn vendor(&self, slug: &str) -> Result<VendorCard, ApiError> {
        self.get(&format!("/api/public/{slug}")).await
    }

    pub async fn services(&self, slug: &str) -> Result<Vec<ServiceInfo>, ApiError> {
        self.get(&format!("/api/public/{slug}/services")).await
    }

    pub async fn slots(
        &self,
        slug: &str,
        service_id: i64,
        date: &str,
    ) -> Result<SlotsResponse, ApiError> {
        self.get(&format!(
            "/api/public/{slug}/slots?service_id={service_id}&date={date}"
        ))
        .await
    }

    pub async fn days(
        &self,
        slug: &str,
        service_id: i64,
        year: i32,
        month: u32,
    ) -> Result<Vec<CalendarDay>, ApiError> {
        self.get(&format!(
            "/api/public/{slug}/days?service_id={service_id}&year={year}&month={month}"
        ))
        .await
    }

    pub async fn create_booking(
        &self,
        slug: &str,
        body: &CreateBooking<'_>,
    ) -> Result<BookingCreated, ApiError> {
        let url = format!("{}/api/public/{}/bookings", self.base_url, slug);
        let envelope: Envelope<BookingCreated> = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Unavailable(e.into()))?
            .json()
            .await
            .map_err(|e| ApiError::Unavailable(e.into()))?;
        unwrap_envelope(envelope)
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, ApiError> {
    if envelope.ok {
        envelope
            .data
            .ok_or_else(|| ApiError::Unavailable(anyhow::anyhow!("empty response body")))
    } else {
        Err(ApiError::Rejected(
            envelope
                .error
                .unwrap_or_else(|| "Запрос отклонён".to_string()),
        ))
    }
}
