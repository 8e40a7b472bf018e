// src/audit.rs
//
// Append-only audit trail. Writes are best-effort: callers go through
// `record_best_effort`, which logs failures and never propagates them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::appointments::model::Actor;
use crate::store::StoreError;

pub const APPOINTMENT_ENTITY: &str = "Appointment";
pub const USER_ENTITY: &str = "User";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CreateAppointment,
    UpdateAppointment,
    PatchAppointment,
    CancelAppointment,
    DeleteAppointmentHard,
    LoginSuccess,
    LoginFail,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateAppointment => "CREATE_APPOINTMENT",
            AuditAction::UpdateAppointment => "UPDATE_APPOINTMENT",
            AuditAction::PatchAppointment => "PATCH_APPOINTMENT",
            AuditAction::CancelAppointment => "CANCEL_APPOINTMENT",
            AuditAction::DeleteAppointmentHard => "DELETE_APPOINTMENT_HARD",
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFail => "LOGIN_FAIL",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity: &'static str,
    pub user_id: Option<Uuid>,
    pub entity_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity: &'static str, actor: &Actor) -> Self {
        Self {
            action,
            entity,
            user_id: actor.user_id,
            entity_id: None,
            details: None,
            ip: actor.ip.clone(),
            user_agent: actor.user_agent.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

/// Write `entry`, logging instead of failing when the recorder is unavailable.
pub async fn record_best_effort(recorder: &dyn AuditRecorder, entry: AuditEntry) {
    if let Err(e) = recorder.record(&entry).await {
        tracing::warn!(
            action = entry.action.as_str(),
            entity_id = entry.entity_id.as_deref().unwrap_or("-"),
            "audit write failed: {e}"
        );
    }
}

/* ============================================================
   PostgreSQL
   ============================================================ */

#[derive(Clone)]
pub struct PgAuditRecorder {
    pool: sqlx::PgPool,
}

impl PgAuditRecorder {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRecorder for PgAuditRecorder {
    async fn record(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log
                (action, entity, user_id, entity_id, details, ip, user_agent, created_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.action.as_str())
        .bind(entry.entity)
        .bind(entry.user_id)
        .bind(entry.entity_id.as_deref())
        .bind(entry.details.as_ref().map(|d| d.to_string()))
        .bind(entry.ip.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/* ============================================================
   In-memory
   ============================================================ */

#[derive(Clone, Default)]
pub struct MemoryAuditRecorder {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// While set, every write fails with `StoreError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditRecorder for MemoryAuditRecorder {
    async fn record(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit log unavailable".into()));
        }
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}
