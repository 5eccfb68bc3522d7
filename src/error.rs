use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::models::{AvailabilityError, PaymentError, UnknownVariant};
use crate::services::appointment::AppointmentError;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Email or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} {id} not found"))
    }

    /// Logs the driver error and hides it from the client.
    ///
    /// Constraint violations are the caller's fault and come back as 400/409.
    pub fn db(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            if db.is_unique_violation() {
                return ApiError::Conflict("ALREADY_EXISTS", "record already exists".into());
            }
            if db.is_foreign_key_violation() {
                return ApiError::BadRequest(
                    "UNKNOWN_REFERENCE",
                    "a referenced record does not exist".into(),
                );
            }
            if db.is_check_violation() {
                return ApiError::validation(db.message().to_string());
            }
        }
        tracing::error!(error = %e, "database error");
        ApiError::Internal("database error".into())
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::db(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(e) => ApiError::db(e),
            StoreError::SlotTaken(existing) => ApiError::Conflict(
                "SLOT_TAKEN",
                format!("provider is already booked by appointment {existing}"),
            ),
            StoreError::Decode(e) => {
                tracing::error!(error = %e, "stored value could not be decoded");
                ApiError::Internal("stored value could not be decoded".into())
            }
        }
    }
}

impl From<UnknownVariant> for ApiError {
    fn from(e: UnknownVariant) -> Self {
        ApiError::validation(e.to_string())
    }
}

impl From<AppointmentError> for ApiError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::NotFound(id) => ApiError::not_found("appointment", id),
            AppointmentError::IdMismatch { .. } => {
                ApiError::BadRequest("ID_MISMATCH", e.to_string())
            }
            AppointmentError::Validation(msg) => ApiError::validation(msg),
            AppointmentError::InvalidTransition { .. } => {
                ApiError::Conflict("INVALID_TRANSITION", e.to_string())
            }
            AppointmentError::SlotTaken(_) => ApiError::Conflict("SLOT_TAKEN", e.to_string()),
            AppointmentError::Conflict(_) => ApiError::Conflict("CONCURRENT_UPDATE", e.to_string()),
            AppointmentError::Ledger(inner) => {
                tracing::error!(error = %inner, "blockchain collaborator failed");
                ApiError::Internal("could not register appointment contract".into())
            }
            AppointmentError::Store(inner) => inner.into(),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::NotRefundable(_) => ApiError::Conflict("NOT_REFUNDABLE", e.to_string()),
            _ => ApiError::validation(e.to_string()),
        }
    }
}

impl From<AvailabilityError> for ApiError {
    fn from(e: AvailabilityError) -> Self {
        ApiError::validation(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}
