// src/store/memory.rs
//
// In-process stores. A transaction holds the whole appointment table lock until it is
// committed or dropped, so units of work are strictly serialized.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::appointments::model::{Appointment, AppointmentFilter, PageRequest, TimeWindow};
use crate::models::{Role, SessionLookupRow, SessionTokenRow, UserRow};
use crate::store::{AccountStore, AppointmentStore, ScheduleTx, StoreError};

/* ============================================================
   Appointments
   ============================================================ */

#[derive(Debug, Clone, Default)]
struct Tables {
    patients: HashSet<Uuid>,
    professionals: HashSet<Uuid>,
    appointments: HashMap<Uuid, Appointment>,
}

impl Tables {
    fn overlapping(&self, professional_id: Uuid, window: TimeWindow, exclude: Option<Uuid>) -> Vec<Appointment> {
        let mut rows: Vec<Appointment> = self
            .appointments
            .values()
            .filter(|a| a.professional_id == professional_id)
            .filter(|a| a.status.is_active())
            .filter(|a| Some(a.id) != exclude)
            .filter(|a| a.window().overlaps(&window))
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.scheduled_at);
        rows
    }
}

#[derive(Clone, Default)]
pub struct MemoryAppointmentStore {
    tables: Arc<Mutex<Tables>>,
    failing_commits: Arc<AtomicU32>,
}

impl MemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_patient(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().await.patients.insert(id);
        id
    }

    pub async fn add_professional(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().await.professionals.insert(id);
        id
    }

    /// Every stored appointment, in no particular order.
    pub async fn snapshot(&self) -> Vec<Appointment> {
        self.tables.lock().await.appointments.values().cloned().collect()
    }

    /// The next `n` commits fail as if a concurrent writer won the race.
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl AppointmentStore for MemoryAppointmentStore {
    async fn begin(&self) -> Result<Box<dyn ScheduleTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryScheduleTx {
            guard,
            staged,
            failing_commits: self.failing_commits.clone(),
        }))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.tables.lock().await.appointments.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &AppointmentFilter,
        page: PageRequest,
    ) -> Result<(Vec<Appointment>, i64), StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at).then(a.id.cmp(&b.id)));

        let total = rows.len() as i64;
        let items = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();
        Ok((items, total))
    }

    async fn overlapping(
        &self,
        professional_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self.tables.lock().await.overlapping(professional_id, window, exclude))
    }
}

struct MemoryScheduleTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
    failing_commits: Arc<AtomicU32>,
}

#[async_trait]
impl ScheduleTx for MemoryScheduleTx {
    async fn patient_exists(&mut self, patient_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.staged.patients.contains(&patient_id))
    }

    async fn lock_professional(&mut self, professional_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.staged.professionals.contains(&professional_id))
    }

    async fn load_for_update(&mut self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.staged.appointments.get(&id).cloned())
    }

    async fn active_overlapping(
        &mut self,
        professional_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self.staged.overlapping(professional_id, window, exclude))
    }

    async fn insert(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        self.staged.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn update(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        self.staged.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn delete(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.staged.appointments.remove(&id);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let injected = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Serialization);
        }
        *self.guard = std::mem::take(&mut self.staged);
        Ok(())
    }
}

/* ============================================================
   Accounts and sessions
   ============================================================ */

#[derive(Debug, Clone)]
struct SessionRecord {
    session_token_id: Uuid,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

#[derive(Default)]
struct AccountTables {
    users: HashMap<Uuid, UserRow>,
    // keyed by token hash
    sessions: HashMap<String, SessionRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    tables: Arc<Mutex<AccountTables>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn revoke_all(&self, user_id: Uuid) {
        for s in self.tables.lock().await.sessions.values_mut() {
            if s.user_id == user_id {
                s.revoked = true;
            }
        }
    }

    pub async fn deactivate(&self, user_id: Uuid) {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            user.is_active = false;
        }
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRow>, StoreError> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn mark_login(&self, user_id: Uuid) -> Result<(), StoreError> {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            user.last_login_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionTokenRow, StoreError> {
        let record = SessionRecord {
            session_token_id: Uuid::new_v4(),
            user_id,
            expires_at,
            revoked: false,
        };
        let row = SessionTokenRow {
            session_token_id: record.session_token_id,
            expires_at,
        };
        self.tables
            .lock()
            .await
            .sessions
            .insert(token_hash.to_string(), record);
        Ok(row)
    }

    async fn find_active_session(&self, token_hash: &str) -> Result<Option<SessionLookupRow>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(session) = tables.sessions.get(token_hash) else {
            return Ok(None);
        };
        if session.revoked || session.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(tables
            .users
            .get(&session.user_id)
            .filter(|u| u.is_active)
            .map(|u| SessionLookupRow {
                session_token_id: session.session_token_id,
                user_id: u.user_id,
                role: u.role,
            }))
    }

    async fn touch_session(&self, session_token_id: Uuid) -> Result<(), StoreError> {
        // activity is not tracked in memory; only the session has to exist
        let tables = self.tables.lock().await;
        if tables.sessions.values().any(|s| s.session_token_id == session_token_id) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unknown session {session_token_id}")))
        }
    }

    async fn upsert_user(&self, email: &str, password_hash: &str, role: Role) -> Result<UserRow, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.values_mut().find(|u| u.email == email) {
            user.password_hash = password_hash.to_string();
            user.role = role;
            user.is_active = true;
            return Ok(user.clone());
        }

        let user = UserRow {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role,
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };
        tables.users.insert(user.user_id, user.clone());
        Ok(user)
    }
}
