use axum::{http::StatusCode, Json};
use thiserror::Error;

use crate::models::ApiResponse;

/// Error taxonomy of the availability/booking core.
///
/// Schedule-configuration variants surface only on the vendor side;
/// `SlotUnavailable` is the expected rejection path for booking clients
/// and callers are supposed to re-fetch slots on it.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid schedule time: {0}")]
    InvalidScheduleFormat(String),

    #[error("custom-hours exception is missing start or end time")]
    IncompleteException,

    #[error("service duration must be a positive number of minutes")]
    InvalidServiceDuration,

    #[error("service not found, inactive, or not bookable online")]
    ServiceNotFound,

    #[error("client phone or an existing client id is required")]
    InvalidClient,

    #[error("requested interval is no longer available")]
    SlotUnavailable,

    #[error("requested time is in the past or violates the minimum lead time")]
    PastOrTooSoon,

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidScheduleFormat(_) | Self::IncompleteException => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::InvalidServiceDuration => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ServiceNotFound => StatusCode::NOT_FOUND,
            Self::InvalidClient => StatusCode::BAD_REQUEST,
            Self::SlotUnavailable => StatusCode::CONFLICT,
            Self::PastOrTooSoon => StatusCode::BAD_REQUEST,
            Self::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the person booking (clients see Russian copy;
    /// schedule misconfiguration is worded for the vendor settings UI).
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidScheduleFormat(_) => "Неверный формат времени в расписании",
            Self::IncompleteException => "У исключения не указаны часы работы",
            Self::InvalidServiceDuration => "У услуги указана некорректная длительность",
            Self::ServiceNotFound => "Услуга недоступна",
            Self::InvalidClient => "Укажите телефон для записи",
            Self::SlotUnavailable => "Это время уже занято. Выберите другое.",
            Self::PastOrTooSoon => "На это время записаться уже нельзя",
            Self::Db(_) => "Что-то пошло не так. Попробуйте позже.",
        }
    }

    /// Convert into the handler rejection tuple. DB errors are logged
    /// here so call sites don't have to; the rest are normal outcomes.
    pub fn reject(self) -> (StatusCode, Json<ApiResponse<()>>) {
        if let Self::Db(ref e) = self {
            tracing::error!("booking core db error: {}", e);
        }
        (self.status_code(), Json(ApiResponse::error(self.public_message())))
    }

    /// Rejection for the public booking endpoints. Schedule and service
    /// misconfiguration is the vendor's problem; a booking client only
    /// ever sees the generic failure.
    pub fn reject_public(self) -> (StatusCode, Json<ApiResponse<()>>) {
        match self {
            Self::InvalidScheduleFormat(_)
            | Self::IncompleteException
            | Self::InvalidServiceDuration => {
                tracing::error!("misconfigured schedule hit a public endpoint: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error("Что-то пошло не так. Попробуйте позже.")),
                )
            }
            other => other.reject(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_conflict_maps_to_409() {
        assert_eq!(BookingError::SlotUnavailable.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_db_error_is_opaque_to_clients() {
        let err = BookingError::Db(sqlx::Error::PoolClosed);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("Pool"));
    }

    #[test]
    fn test_config_errors_are_opaque_on_public_surface() {
        for err in [
            BookingError::InvalidScheduleFormat("-1:30".into()),
            BookingError::IncompleteException,
            BookingError::InvalidServiceDuration,
        ] {
            let (status, body) = err.reject_public();
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(
                body.0.error.as_deref(),
                Some("Что-то пошло не так. Попробуйте позже.")
            );
        }
        // Normal booking outcomes keep their own copy
        let (status, body) = BookingError::SlotUnavailable.reject_public();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.0.error.as_deref(), Some("Это время уже занято. Выберите другое."));
    }

    #[test]
    fn test_schedule_errors_are_unprocessable() {
        assert_eq!(
            BookingError::InvalidScheduleFormat("9am".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            BookingError::IncompleteException.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
