// src/routes/appointment_routes.rs

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    appointments::{
        Appointment, AppointmentFilter, AppointmentInput, AppointmentPatch, AppointmentStatus,
        AppointmentUpdate, Page, PageRequest, Removal,
    },
    error::ApiError,
    middleware::{auth_context::AuthContext, request_meta::RequestMeta},
    models::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/conflicts", get(check_conflicts))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment)
                .put(update_appointment)
                .patch(patch_appointment)
                .delete(delete_appointment),
        )
}

/* ============================================================
   Query DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: Option<i64>,
    #[serde(alias = "pageSize", alias = "page_size")]
    pub size: Option<i64>,
    #[serde(alias = "patient_id")]
    pub patient_id: Option<Uuid>,
    #[serde(alias = "professional_id")]
    pub professional_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    #[serde(alias = "fromTime")]
    pub from: Option<DateTime<Utc>>,
    #[serde(alias = "toTime")]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictQuery {
    #[serde(alias = "professional_id")]
    pub professional_id: Uuid,
    #[serde(alias = "scheduled_at")]
    pub scheduled_at: DateTime<Utc>,
    pub duration: Option<i32>,
    #[serde(alias = "exclude_id")]
    pub exclude_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub hard: Option<String>,
    pub reason: Option<String>,
}

impl DeleteQuery {
    /// Only a case-insensitive `true` purges; any other value cancels.
    pub fn is_hard(&self) -> bool {
        self.hard
            .as_deref()
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

/* ============================================================
   Handlers
   ============================================================ */

async fn list_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Page<Appointment>>, ApiError> {
    let Query(q) = query?;
    let filter = AppointmentFilter {
        patient_id: q.patient_id,
        professional_id: q.professional_id,
        status: q.status,
        from: q.from,
        to: q.to,
    };
    let page = PageRequest::clamped(q.page, q.size);

    Ok(Json(state.appointments.list(&filter, page).await?))
}

async fn check_conflicts(
    State(state): State<AppState>,
    _auth: AuthContext,
    query: Result<Query<ConflictQuery>, QueryRejection>,
) -> Result<Json<ConflictCheckResponse>, ApiError> {
    let Query(q) = query?;
    let conflicting = state
        .appointments
        .check_conflicts(q.professional_id, q.scheduled_at, q.duration, q.exclude_id)
        .await?;

    Ok(Json(ConflictCheckResponse {
        has_conflict: !conflicting.is_empty(),
        conflicting_appointments: conflicting,
    }))
}

async fn get_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(state.appointments.get(appointment_id).await?))
}

async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    meta: RequestMeta,
    payload: Result<Json<AppointmentInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    auth.require_appointment_manager()?;
    let Json(input) = payload?;

    let created = state
        .appointments
        .create(&meta.actor(Some(auth.user_id)), input)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    meta: RequestMeta,
    Path(appointment_id): Path<Uuid>,
    payload: Result<Json<AppointmentInput>, JsonRejection>,
) -> Result<Json<Appointment>, ApiError> {
    auth.require_appointment_manager()?;
    let Json(input) = payload?;

    let updated = state
        .appointments
        .update(&meta.actor(Some(auth.user_id)), appointment_id, AppointmentUpdate::Full(input))
        .await?;
    Ok(Json(updated))
}

async fn patch_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    meta: RequestMeta,
    Path(appointment_id): Path<Uuid>,
    payload: Result<Json<AppointmentPatch>, JsonRejection>,
) -> Result<Json<Appointment>, ApiError> {
    auth.require_appointment_manager()?;
    let Json(patch) = payload?;

    let updated = state
        .appointments
        .update(&meta.actor(Some(auth.user_id)), appointment_id, AppointmentUpdate::Partial(patch))
        .await?;
    Ok(Json(updated))
}

async fn delete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    meta: RequestMeta,
    Path(appointment_id): Path<Uuid>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    auth.require_appointment_manager()?;
    let Query(q) = query?;

    let removal = if q.is_hard() {
        Removal::Purge
    } else {
        Removal::Cancel { reason: q.reason }
    };
    state
        .appointments
        .remove(&meta.actor(Some(auth.user_id)), appointment_id, removal)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
