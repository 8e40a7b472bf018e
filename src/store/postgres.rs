// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::appointments::model::{Appointment, AppointmentFilter, PageRequest, TimeWindow};
use crate::models::{Role, SessionLookupRow, SessionTokenRow, UserRow};
use crate::store::{AccountStore, AppointmentStore, ScheduleTx, StoreError};

/* ============================================================
   Appointments
   ============================================================ */

#[derive(Clone)]
pub struct PgAppointmentStore {
    pool: PgPool,
}

impl PgAppointmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn begin(&self) -> Result<Box<dyn ScheduleTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgScheduleTx { tx: Some(tx) }))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let row = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT id, patient_id, professional_id, scheduled_at, duration, type, status,
                   reason, notes, cancel_reason, created_at, updated_at
            FROM appointment
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list(
        &self,
        filter: &AppointmentFilter,
        page: PageRequest,
    ) -> Result<(Vec<Appointment>, i64), StoreError> {
        let items = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT id, patient_id, professional_id, scheduled_at, duration, type, status,
                   reason, notes, cancel_reason, created_at, updated_at
            FROM appointment
            WHERE ($1::uuid IS NULL OR patient_id = $1)
              AND ($2::uuid IS NULL OR professional_id = $2)
              AND ($3::appointment_status IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR scheduled_at >= $4)
              AND ($5::timestamptz IS NULL OR scheduled_at <= $5)
            ORDER BY scheduled_at DESC, id ASC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(filter.patient_id)
        .bind(filter.professional_id)
        .bind(filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(page.size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM appointment
            WHERE ($1::uuid IS NULL OR patient_id = $1)
              AND ($2::uuid IS NULL OR professional_id = $2)
              AND ($3::appointment_status IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR scheduled_at >= $4)
              AND ($5::timestamptz IS NULL OR scheduled_at <= $5)
            "#,
        )
        .bind(filter.patient_id)
        .bind(filter.professional_id)
        .bind(filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await?;

        Ok((items, total))
    }

    async fn overlapping(
        &self,
        professional_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        select_overlapping(&mut conn, professional_id, window, exclude).await
    }
}

pub struct PgScheduleTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgScheduleTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| StoreError::Unavailable("transaction already committed".into()))
    }
}

async fn select_overlapping(
    conn: &mut PgConnection,
    professional_id: Uuid,
    window: TimeWindow,
    exclude: Option<Uuid>,
) -> Result<Vec<Appointment>, StoreError> {
    // existing.start < candidate.end AND candidate.start < existing.end
    let rows = sqlx::query_as::<_, Appointment>(
        r#"
        SELECT id, patient_id, professional_id, scheduled_at, duration, type, status,
               reason, notes, cancel_reason, created_at, updated_at
        FROM appointment
        WHERE professional_id = $1
          AND status <> 'CANCELLED'
          AND scheduled_at < $3
          AND scheduled_at + make_interval(mins => duration) > $2
          AND ($4::uuid IS NULL OR id <> $4)
        ORDER BY scheduled_at ASC
        "#,
    )
    .bind(professional_id)
    .bind(window.start)
    .bind(window.end)
    .bind(exclude)
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

#[async_trait]
impl ScheduleTx for PgScheduleTx {
    async fn patient_exists(&mut self, patient_id: Uuid) -> Result<bool, StoreError> {
        let found: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM patient
            WHERE id = $1
            "#,
        )
        .bind(patient_id)
        .fetch_optional(self.conn()?)
        .await?;

        Ok(found.is_some())
    }

    async fn lock_professional(&mut self, professional_id: Uuid) -> Result<bool, StoreError> {
        let found: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM professional
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(professional_id)
        .fetch_optional(self.conn()?)
        .await?;

        Ok(found.is_some())
    }

    async fn load_for_update(&mut self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let row = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT id, patient_id, professional_id, scheduled_at, duration, type, status,
                   reason, notes, cancel_reason, created_at, updated_at
            FROM appointment
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(self.conn()?)
        .await?;

        Ok(row)
    }

    async fn active_overlapping(
        &mut self,
        professional_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        select_overlapping(self.conn()?, professional_id, window, exclude).await
    }

    async fn insert(&mut self, a: &Appointment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO appointment (
              id, patient_id, professional_id, scheduled_at, duration, type, status,
              reason, notes, cancel_reason, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(a.id)
        .bind(a.patient_id)
        .bind(a.professional_id)
        .bind(a.scheduled_at)
        .bind(a.duration)
        .bind(a.kind)
        .bind(a.status)
        .bind(a.reason.as_deref())
        .bind(a.notes.as_deref())
        .bind(a.cancel_reason.as_deref())
        .bind(a.created_at)
        .bind(a.updated_at)
        .execute(self.conn()?)
        .await?;

        Ok(())
    }

    async fn update(&mut self, a: &Appointment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE appointment
            SET patient_id = $2,
                professional_id = $3,
                scheduled_at = $4,
                duration = $5,
                type = $6,
                status = $7,
                reason = $8,
                notes = $9,
                cancel_reason = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(a.id)
        .bind(a.patient_id)
        .bind(a.professional_id)
        .bind(a.scheduled_at)
        .bind(a.duration)
        .bind(a.kind)
        .bind(a.status)
        .bind(a.reason.as_deref())
        .bind(a.notes.as_deref())
        .bind(a.cancel_reason.as_deref())
        .bind(a.updated_at)
        .execute(self.conn()?)
        .await?;

        Ok(())
    }

    async fn delete(&mut self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM appointment WHERE id = $1"#)
            .bind(id)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Unavailable("transaction already committed".into()))?;
        tx.commit().await?;
        Ok(())
    }
}

/* ============================================================
   Accounts and sessions
   ============================================================ */

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, email, password_hash, role, is_active, last_login_at, created_at
            FROM app_user
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, email, password_hash, role, is_active, last_login_at, created_at
            FROM app_user
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_login(&self, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE app_user SET last_login_at = now() WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionTokenRow, StoreError> {
        let row = sqlx::query_as::<_, SessionTokenRow>(
            r#"
            INSERT INTO session_token (user_id, session_token_hash, expires_at)
            VALUES ($1, $2, $3)
            RETURNING session_token_id, expires_at
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_active_session(&self, token_hash: &str) -> Result<Option<SessionLookupRow>, StoreError> {
        let row = sqlx::query_as::<_, SessionLookupRow>(
            r#"
            SELECT st.session_token_id, st.user_id, u.role
            FROM session_token st
            JOIN app_user u ON u.user_id = st.user_id
            WHERE st.session_token_hash = $1
              AND st.revoked_at IS NULL
              AND st.expires_at > now()
              AND u.is_active = true
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn touch_session(&self, session_token_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE session_token
            SET last_seen_at = now()
            WHERE session_token_id = $1
            "#,
        )
        .bind(session_token_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_user(&self, email: &str, password_hash: &str, role: Role) -> Result<UserRow, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO app_user (email, password_hash, role, is_active)
            VALUES ($1, $2, $3, true)
            ON CONFLICT (email) DO UPDATE
              SET password_hash = EXCLUDED.password_hash,
                  role = EXCLUDED.role,
                  is_active = true,
                  updated_at = now()
            RETURNING user_id, email, password_hash, role, is_active, last_login_at, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
