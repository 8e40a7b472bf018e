use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use chrono::{Duration, Utc};

use crate::{
    appointments::Actor,
    audit::{AuditAction, AuditEntry, USER_ENTITY, record_best_effort},
    auth::{generate_access_token, hash_access_token, verify_password},
    error::ApiError,
    middleware::{auth_context::AuthContext, request_meta::RequestMeta},
    models::*,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
}

async fn reject_login(state: &AppState, actor: &Actor) -> ApiError {
    let entry = AuditEntry::new(AuditAction::LoginFail, USER_ENTITY, actor);
    record_best_effort(state.audit.as_ref(), entry).await;
    ApiError::invalid_credentials()
}

pub async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let client = meta.ip.as_deref().unwrap_or("unknown");
    if let Err(retry_after) = state.login_throttle.check(client) {
        tracing::warn!(client, retry_after, "login throttled");
        return Err(ApiError::RateLimited { retry_after });
    }

    let Json(req) = payload?;
    let email = req.email.trim();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "MISSING_CREDENTIALS",
            "email and password are required".into(),
        ));
    }

    // 1) Load app_user; unknown and disabled accounts look the same to the caller
    let user = match state.accounts.find_user_by_email(email).await? {
        Some(u) if u.is_active => u,
        _ => {
            tracing::warn!("login rejected: unknown or inactive account");
            return Err(reject_login(&state, &meta.actor(None)).await);
        }
    };

    // 2) Verify password
    if !verify_password(&req.password, &user.password_hash) {
        tracing::warn!(user_id = %user.user_id, "login rejected: bad password");
        return Err(reject_login(&state, &meta.actor(Some(user.user_id))).await);
    }

    // 3) Create session_token
    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    let session = state
        .accounts
        .insert_session(user.user_id, &token_hash, expires_at)
        .await?;
    state.accounts.mark_login(user.user_id).await?;

    tracing::info!(user_id = %user.user_id, "login succeeded");
    let entry = AuditEntry::new(AuditAction::LoginSuccess, USER_ENTITY, &meta.actor(Some(user.user_id)))
        .entity_id(user.user_id);
    record_best_effort(state.audit.as_ref(), entry).await;

    Ok(Json(LoginResponse {
        token: access_token,
        expires_at: session.expires_at,
        user: UserProfile::from(&user),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<MeResponse>, ApiError> {
    let user = state
        .accounts
        .find_user(auth.user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(ApiError::session_expired)?;

    Ok(Json(MeResponse {
        user: UserProfile::from(&user),
        session: SessionInfo {
            session_token_id: auth.session_token_id,
        },
    }))
}
