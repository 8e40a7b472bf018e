// src/store/mod.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::appointments::model::{Appointment, AppointmentFilter, PageRequest, TimeWindow};
use crate::models::{Role, SessionLookupRow, SessionTokenRow, UserRow};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryAccountStore, MemoryAppointmentStore};
pub use postgres::{PgAccountStore, PgAppointmentStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Concurrent transactions collided; the whole unit of work may be retried.
    #[error("transaction could not be serialized")]
    Serialization,

    #[error("row decode error: {0}")]
    Decode(String),

    #[error("{0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Serialization)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            // serialization_failure, deadlock_detected
            sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) => {
                StoreError::Serialization
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
                StoreError::Decode(e.to_string())
            }
            _ => StoreError::Unavailable(format!("db error: {e}")),
        }
    }
}

/// Appointment persistence. Reads go straight to the store; every mutation goes
/// through a [`ScheduleTx`].
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ScheduleTx>, StoreError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Matching rows ordered by `scheduled_at` descending, plus the unpaged total.
    async fn list(
        &self,
        filter: &AppointmentFilter,
        page: PageRequest,
    ) -> Result<(Vec<Appointment>, i64), StoreError>;

    /// Active appointments of `professional_id` whose window overlaps `window`.
    async fn overlapping(
        &self,
        professional_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError>;
}

/// One unit of work. Dropping it without `commit` discards every staged change.
#[async_trait]
pub trait ScheduleTx: Send {
    async fn patient_exists(&mut self, patient_id: Uuid) -> Result<bool, StoreError>;

    /// Returns false when the professional does not exist. Holding the lock until the
    /// end of the transaction serializes writers for the same schedule.
    async fn lock_professional(&mut self, professional_id: Uuid) -> Result<bool, StoreError>;

    async fn load_for_update(&mut self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn active_overlapping(
        &mut self,
        professional_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert(&mut self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn update(&mut self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn delete(&mut self, id: Uuid) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRow>, StoreError>;

    async fn mark_login(&self, user_id: Uuid) -> Result<(), StoreError>;

    async fn insert_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionTokenRow, StoreError>;

    /// Unrevoked, unexpired session whose user is still active.
    async fn find_active_session(&self, token_hash: &str) -> Result<Option<SessionLookupRow>, StoreError>;

    async fn touch_session(&self, session_token_id: Uuid) -> Result<(), StoreError>;

    /// Create the user, or reset password/role and re-activate it when the email exists.
    async fn upsert_user(&self, email: &str, password_hash: &str, role: Role) -> Result<UserRow, StoreError>;
}
