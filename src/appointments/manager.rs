// src/appointments/manager.rs
//
// Every mutation runs its existence checks, conflict query and write inside a single
// store transaction. Audit entries are written after commit and never fail the call.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::appointments::error::{AppointmentError, FieldIssue, Reference};
use crate::appointments::model::{
    Actor, Appointment, AppointmentFilter, AppointmentInput, AppointmentPatch, AppointmentStatus,
    AppointmentUpdate, DEFAULT_CANCEL_REASON, DEFAULT_DURATION_MIN, MAX_DURATION_MIN, Page,
    PageRequest, Removal, TimeWindow,
};
use crate::audit::{APPOINTMENT_ENTITY, AuditAction, AuditEntry, AuditRecorder, record_best_effort};
use crate::store::{AppointmentStore, ScheduleTx};

pub const DEFAULT_TX_RETRY_LIMIT: u32 = 3;

pub struct AppointmentManager {
    store: Arc<dyn AppointmentStore>,
    audit: Arc<dyn AuditRecorder>,
    tx_retry_limit: u32,
}

impl AppointmentManager {
    pub fn new(store: Arc<dyn AppointmentStore>, audit: Arc<dyn AuditRecorder>) -> Self {
        Self {
            store,
            audit,
            tx_retry_limit: DEFAULT_TX_RETRY_LIMIT,
        }
    }

    /// How many times a unit of work is re-run after a serialization failure.
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.tx_retry_limit = limit;
        self
    }

    /* ============================================================
       Reads
       ============================================================ */

    pub async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        let found = self.store.fetch(id).await.map_err(AppointmentError::from);
        observe("get", found.and_then(|a| a.ok_or(AppointmentError::NotFound)))
    }

    pub async fn list(
        &self,
        filter: &AppointmentFilter,
        page: PageRequest,
    ) -> Result<Page<Appointment>, AppointmentError> {
        let (items, total) = observe("list", self.store.list(filter, page).await.map_err(Into::into))?;
        debug!("listed {} of {} appointments (page {})", items.len(), total, page.page);
        Ok(Page::new(page, total, items))
    }

    /// Active appointments of `professional_id` that a booking at `scheduled_at`
    /// would collide with. Read-only; nothing is locked.
    pub async fn check_conflicts(
        &self,
        professional_id: Uuid,
        scheduled_at: DateTime<Utc>,
        duration: Option<i32>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let duration = duration.unwrap_or(DEFAULT_DURATION_MIN);
        observe("check_conflicts", validate(vec![], duration))?;

        let window = TimeWindow::starting_at(scheduled_at, duration);
        let found = self.store.overlapping(professional_id, window, exclude).await;
        observe("check_conflicts", found.map_err(Into::into))
    }

    /* ============================================================
       Mutations
       ============================================================ */

    pub async fn create(&self, actor: &Actor, input: AppointmentInput) -> Result<Appointment, AppointmentError> {
        let draft = observe("create", new_appointment(input, stored_now()))?;
        let draft = &draft;
        let created = observe("create", self.retrying("create", move || self.try_create(draft)).await)?;

        info!(
            appointment_id = %created.id,
            professional_id = %created.professional_id,
            "{} appointment created for {}",
            created.kind,
            created.scheduled_at
        );
        let entry = AuditEntry::new(AuditAction::CreateAppointment, APPOINTMENT_ENTITY, actor).entity_id(created.id);
        record_best_effort(self.audit.as_ref(), entry).await;

        Ok(created)
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, AppointmentError> {
        let action = if update.is_full() {
            AuditAction::UpdateAppointment
        } else {
            AuditAction::PatchAppointment
        };
        let update = &update;
        let (before, after) = observe("update", self.retrying("update", move || self.try_update(id, update)).await)?;

        let changed = before.changed_fields(&after);
        info!(appointment_id = %id, "appointment updated ({} field(s) changed)", changed.len());
        let entry = AuditEntry::new(action, APPOINTMENT_ENTITY, actor)
            .entity_id(id)
            .details(serde_json::Value::Object(changed));
        record_best_effort(self.audit.as_ref(), entry).await;

        Ok(after)
    }

    /// Soft cancel or hard purge. Cancelling an already cancelled appointment
    /// changes nothing and records nothing.
    pub async fn remove(&self, actor: &Actor, id: Uuid, removal: Removal) -> Result<(), AppointmentError> {
        match removal {
            Removal::Cancel { reason } => {
                let reason = clean_text(reason).unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
                let reason = reason.as_str();
                let cancelled = observe("cancel", self.retrying("cancel", move || self.try_cancel(id, reason)).await)?;

                let Some(cancelled) = cancelled else {
                    debug!(appointment_id = %id, "appointment already cancelled");
                    return Ok(());
                };
                info!(appointment_id = %id, "appointment cancelled");
                let entry = AuditEntry::new(AuditAction::CancelAppointment, APPOINTMENT_ENTITY, actor)
                    .entity_id(id)
                    .details(serde_json::json!({ "cancelReason": cancelled.cancel_reason }));
                record_best_effort(self.audit.as_ref(), entry).await;
            }
            Removal::Purge => {
                let purged = observe("purge", self.retrying("purge", move || self.try_purge(id)).await)?;

                info!(appointment_id = %id, "appointment purged");
                let entry = AuditEntry::new(AuditAction::DeleteAppointmentHard, APPOINTMENT_ENTITY, actor)
                    .entity_id(id)
                    .details(serde_json::json!({ "status": purged.status }));
                record_best_effort(self.audit.as_ref(), entry).await;
            }
        }
        Ok(())
    }

    /* ============================================================
       Units of work
       ============================================================ */

    async fn try_create(&self, draft: &Appointment) -> Result<Appointment, AppointmentError> {
        let mut tx = self.store.begin().await?;

        if !tx.patient_exists(draft.patient_id).await? {
            return Err(AppointmentError::ReferenceNotFound(Reference::Patient));
        }
        if !tx.lock_professional(draft.professional_id).await? {
            return Err(AppointmentError::ReferenceNotFound(Reference::Professional));
        }
        if draft.status.is_active() {
            ensure_no_conflict(tx.as_mut(), draft, None).await?;
        }

        tx.insert(draft).await?;
        tx.commit().await?;
        Ok(draft.clone())
    }

    async fn try_update(
        &self,
        id: Uuid,
        update: &AppointmentUpdate,
    ) -> Result<(Appointment, Appointment), AppointmentError> {
        let mut tx = self.store.begin().await?;

        let current = tx.load_for_update(id).await?.ok_or(AppointmentError::NotFound)?;
        let next = apply_update(&current, update, stored_now())?;

        let full = update.is_full();
        let check_patient = full || next.patient_id != current.patient_id;
        let check_professional = full || next.professional_id != current.professional_id;
        let check_conflict = next.status.is_active();

        if check_patient && !tx.patient_exists(next.patient_id).await? {
            return Err(AppointmentError::ReferenceNotFound(Reference::Patient));
        }
        if (check_professional || check_conflict) && !tx.lock_professional(next.professional_id).await? {
            return Err(AppointmentError::ReferenceNotFound(Reference::Professional));
        }
        if check_conflict {
            ensure_no_conflict(tx.as_mut(), &next, Some(id)).await?;
        }

        tx.update(&next).await?;
        tx.commit().await?;
        Ok((current, next))
    }

    async fn try_cancel(&self, id: Uuid, reason: &str) -> Result<Option<Appointment>, AppointmentError> {
        let mut tx = self.store.begin().await?;

        let current = tx.load_for_update(id).await?.ok_or(AppointmentError::NotFound)?;
        if current.status == AppointmentStatus::Cancelled {
            return Ok(None);
        }

        let mut next = current.clone();
        next.status = current.status.transition_to(AppointmentStatus::Cancelled)?;
        next.cancel_reason = Some(reason.to_string());
        next.updated_at = stored_now();

        tx.update(&next).await?;
        tx.commit().await?;
        Ok(Some(next))
    }

    async fn try_purge(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        let mut tx = self.store.begin().await?;

        let current = tx.load_for_update(id).await?.ok_or(AppointmentError::NotFound)?;
        tx.delete(id).await?;
        tx.commit().await?;
        Ok(current)
    }

    /// Re-run `attempt` while the store reports a serialization failure, up to the
    /// configured limit. Any other outcome is returned as is.
    async fn retrying<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, AppointmentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppointmentError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(AppointmentError::Store(e)) if e.is_retryable() && retries < self.tx_retry_limit => {
                    retries += 1;
                    warn!(op, retry = retries, "transaction conflict, retrying: {e}");
                }
                other => return other,
            }
        }
    }
}

async fn ensure_no_conflict(
    tx: &mut dyn ScheduleTx,
    candidate: &Appointment,
    exclude: Option<Uuid>,
) -> Result<(), AppointmentError> {
    let clashes = tx
        .active_overlapping(candidate.professional_id, candidate.window(), exclude)
        .await?;
    if clashes.is_empty() {
        return Ok(());
    }
    Err(AppointmentError::SchedulingConflict {
        conflicting: clashes.iter().map(|a| a.id).collect(),
    })
}

/// Business rejections are logged at warn, store failures at error.
fn observe<T>(op: &'static str, result: Result<T, AppointmentError>) -> Result<T, AppointmentError> {
    result.inspect_err(|e| match e {
        AppointmentError::Store(inner) => error!(op, "appointment store failure: {inner}"),
        AppointmentError::SchedulingConflict { conflicting } => {
            warn!(op, conflicting = ?conflicting, "scheduling conflict")
        }
        other => warn!(op, "appointment request rejected: {other}"),
    })
}

/* ============================================================
   Field rules
   ============================================================ */

/// Timestamps are kept at microsecond precision, the resolution Postgres stores.
fn stored_precision(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(6)
}

fn stored_now() -> DateTime<Utc> {
    stored_precision(Utc::now())
}

fn clean_text(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Fails with every collected issue, including a bad duration.
fn validate(mut issues: Vec<FieldIssue>, duration: i32) -> Result<(), AppointmentError> {
    if !(1..=MAX_DURATION_MIN).contains(&duration) {
        issues.push(FieldIssue::new(
            "duration",
            format!("must be between 1 and {MAX_DURATION_MIN} minutes"),
        ));
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppointmentError::Validation(issues))
    }
}

fn new_appointment(input: AppointmentInput, now: DateTime<Utc>) -> Result<Appointment, AppointmentError> {
    let duration = input.duration.unwrap_or(DEFAULT_DURATION_MIN);
    validate(vec![], duration)?;

    Ok(Appointment {
        id: Uuid::new_v4(),
        patient_id: input.patient_id,
        professional_id: input.professional_id,
        scheduled_at: stored_precision(input.scheduled_at),
        duration,
        kind: input.kind,
        status: input.status.unwrap_or_default(),
        reason: clean_text(input.reason),
        notes: clean_text(input.notes),
        cancel_reason: clean_text(input.cancel_reason),
        created_at: now,
        updated_at: now,
    })
}

fn apply_update(
    current: &Appointment,
    update: &AppointmentUpdate,
    now: DateTime<Utc>,
) -> Result<Appointment, AppointmentError> {
    let mut issues = Vec::new();
    let mut next = current.clone();

    match update {
        AppointmentUpdate::Full(input) => {
            if input.kind != current.kind {
                issues.push(FieldIssue::new("type", "appointment type cannot be changed"));
            }
            next.patient_id = input.patient_id;
            next.professional_id = input.professional_id;
            next.scheduled_at = input.scheduled_at;
            next.duration = input.duration.unwrap_or(DEFAULT_DURATION_MIN);
            next.status = input.status.unwrap_or(current.status);
            next.reason = clean_text(input.reason.clone());
            next.notes = clean_text(input.notes.clone());
            if let Some(cancel_reason) = clean_text(input.cancel_reason.clone()) {
                next.cancel_reason = Some(cancel_reason);
            }
        }
        AppointmentUpdate::Partial(patch) => {
            let AppointmentPatch {
                patient_id,
                professional_id,
                scheduled_at,
                duration,
                kind,
                status,
                reason,
                notes,
                cancel_reason,
            } = patch;

            if kind.is_some_and(|k| k != current.kind) {
                issues.push(FieldIssue::new("type", "appointment type cannot be changed"));
            }
            next.patient_id = patient_id.unwrap_or(current.patient_id);
            next.professional_id = professional_id.unwrap_or(current.professional_id);
            next.scheduled_at = scheduled_at.unwrap_or(current.scheduled_at);
            next.duration = duration.unwrap_or(current.duration);
            next.status = status.unwrap_or(current.status);
            if let Some(reason) = reason {
                next.reason = clean_text(reason.clone());
            }
            if let Some(notes) = notes {
                next.notes = clean_text(notes.clone());
            }
            if let Some(cancel_reason) = cancel_reason {
                next.cancel_reason = clean_text(cancel_reason.clone());
            }
        }
    }

    validate(issues, next.duration)?;
    next.scheduled_at = stored_precision(next.scheduled_at);
    next.status = current.status.transition_to(next.status)?;
    next.updated_at = now;
    Ok(next)
}
