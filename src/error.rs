use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::appointments::{AppointmentError, FieldIssue, Reference};
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    Validation(Vec<FieldIssue>),
    NotFound(&'static str, String),
    Conflict(&'static str, String, Option<serde_json::Value>),
    RateLimited { retry_after: u64 },
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Email or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn forbidden_role() -> Self {
        ApiError::Forbidden("FORBIDDEN", "Your role cannot perform this action".into())
    }

    fn to_error_response(code: &str, message: &str, details: Option<serde_json::Value>) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
                details,
            },
        })
    }
}

impl From<AppointmentError> for ApiError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::Validation(issues) => ApiError::Validation(issues),
            AppointmentError::ReferenceNotFound(Reference::Patient) => {
                ApiError::BadRequest("PATIENT_NOT_FOUND", "Patient not found".into())
            }
            AppointmentError::ReferenceNotFound(Reference::Professional) => {
                ApiError::BadRequest("PROFESSIONAL_NOT_FOUND", "Professional not found".into())
            }
            AppointmentError::NotFound => ApiError::NotFound("NOT_FOUND", "Appointment not found".into()),
            AppointmentError::SchedulingConflict { conflicting } => ApiError::Conflict(
                "SCHEDULING_CONFLICT",
                "Professional already has an appointment in this time window".into(),
                Some(serde_json::json!({ "conflictingIds": conflicting })),
            ),
            e @ AppointmentError::InvalidTransition { .. } => {
                ApiError::Conflict("INVALID_TRANSITION", e.to_string(), None)
            }
            // detail stays in the logs
            AppointmentError::Store(_) => ApiError::Internal("Internal server error".into()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!("store failure: {e}");
        ApiError::Internal("Internal server error".into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Validation(vec![FieldIssue::new("body", e.body_text())])
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::Validation(vec![FieldIssue::new("query", e.body_text())])
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg, None)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg, None)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg, None)).into_response()
            }
            ApiError::Validation(issues) => (
                StatusCode::BAD_REQUEST,
                ApiError::to_error_response(
                    "VALIDATION_ERROR",
                    "Request validation failed",
                    serde_json::to_value(issues).ok(),
                ),
            )
                .into_response(),
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg, None)).into_response()
            }
            ApiError::Conflict(code, msg, details) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg, details)).into_response()
            }
            ApiError::RateLimited { retry_after } => {
                let body = ApiError::to_error_response(
                    "RATE_LIMITED",
                    &format!("Too many attempts. Retry after {retry_after}s"),
                    None,
                );
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg, None),
            )
                .into_response(),
        }
    }
}
