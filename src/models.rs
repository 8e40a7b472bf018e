use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::appointments::AppointmentManager;
use crate::audit::AuditRecorder;
use crate::middleware::rate_limit::LoginThrottle;
use crate::store::AccountStore;

#[derive(Clone)]
pub struct AppState {
    pub appointments: Arc<AppointmentManager>,
    pub accounts: Arc<dyn AccountStore>,
    pub audit: Arc<dyn AuditRecorder>,
    pub login_throttle: Arc<LoginThrottle>,
    pub session_ttl_hours: i64,
}

/* -------------------------
   Roles
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Doctor => "DOCTOR",
            Role::Nurse => "NURSE",
            Role::Staff => "STAFF",
        }
    }

    /// Roles allowed to create, change and remove appointments.
    pub fn can_manage_appointments(&self) -> bool {
        matches!(self, Role::Admin | Role::Nurse | Role::Doctor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: UserProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&UserRow> for UserProfile {
    fn from(u: &UserRow) -> Self {
        Self {
            id: u.user_id,
            email: u.email.clone(),
            role: u.role,
            last_login_at: u.last_login_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_token_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionLookupRow {
    pub session_token_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
}
