// src/appointments/model.rs

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const DEFAULT_DURATION_MIN: i32 = 30;
pub const MAX_DURATION_MIN: i32 = 24 * 60;
pub const DEFAULT_CANCEL_REASON: &str = "Cancelled";

/* ============================================================
   Enumerations
   ============================================================ */

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "appointment_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    /// Active appointments occupy their window on the professional's schedule.
    pub fn is_active(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "appointment_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentType {
    Consultation,
    Telemedicine,
    Exam,
    Return,
}

impl AppointmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::Consultation => "CONSULTATION",
            AppointmentType::Telemedicine => "TELEMEDICINE",
            AppointmentType::Exam => "EXAM",
            AppointmentType::Return => "RETURN",
        }
    }
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* ============================================================
   Appointment record
   ============================================================ */

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration: i32,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: AppointmentType,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::starting_at(self.scheduled_at, self.duration)
    }

    /// Fields whose values differ between `self` and `next`, keyed by their wire name
    /// and carrying the new value. Timestamps are not part of the snapshot.
    pub fn changed_fields(&self, next: &Appointment) -> serde_json::Map<String, serde_json::Value> {
        let mut changed = serde_json::Map::new();
        let (Ok(serde_json::Value::Object(before)), Ok(serde_json::Value::Object(after))) =
            (serde_json::to_value(self), serde_json::to_value(next))
        else {
            return changed;
        };

        for (key, value) in after {
            if key == "createdAt" || key == "updatedAt" {
                continue;
            }
            if before.get(&key) != Some(&value) {
                changed.insert(key, value);
            }
        }
        changed
    }
}

/// Half-open interval `[start, end)` an appointment occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn starting_at(start: DateTime<Utc>, duration_min: i32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(i64::from(duration_min)),
        }
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/* ============================================================
   Inputs
   ============================================================ */

/// This is called only when the field is present (even if it's `null`):
/// `null` becomes `Some(None)`, a value becomes `Some(Some(v))`.
fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

/// Full field set, used by Create and by full Update.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentInput {
    #[serde(alias = "patient_id")]
    pub patient_id: Uuid,
    #[serde(alias = "professional_id")]
    pub professional_id: Uuid,
    #[serde(alias = "scheduled_at")]
    pub scheduled_at: DateTime<Utc>,
    pub duration: Option<i32>,
    #[serde(rename = "type")]
    pub kind: AppointmentType,
    pub status: Option<AppointmentStatus>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    #[serde(default, alias = "cancel_reason")]
    pub cancel_reason: Option<String>,
}

/// Partial field set. Nullable text fields use `Option<Option<_>>` so an explicit
/// `null` clears the stored value while an absent field keeps it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPatch {
    #[serde(alias = "patient_id")]
    pub patient_id: Option<Uuid>,
    #[serde(alias = "professional_id")]
    pub professional_id: Option<Uuid>,
    #[serde(alias = "scheduled_at")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
    #[serde(rename = "type")]
    pub kind: Option<AppointmentType>,
    pub status: Option<AppointmentStatus>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub reason: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, alias = "cancel_reason", deserialize_with = "deserialize_double_option")]
    pub cancel_reason: Option<Option<String>>,
}

#[derive(Debug, Clone)]
pub enum AppointmentUpdate {
    Full(AppointmentInput),
    Partial(AppointmentPatch),
}

impl AppointmentUpdate {
    pub fn is_full(&self) -> bool {
        matches!(self, AppointmentUpdate::Full(_))
    }
}

/// Soft cancellation keeps the record; purge removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Cancel { reason: Option<String> },
    Purge,
}

/// Who performed a mutation, as recorded in the audit trail.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub user_id: Option<Uuid>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/* ============================================================
   Listing
   ============================================================ */

#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub patient_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        self.patient_id.is_none_or(|id| a.patient_id == id)
            && self.professional_id.is_none_or(|id| a.professional_id == id)
            && self.status.is_none_or(|s| a.status == s)
            && self.from.is_none_or(|from| a.scheduled_at >= from)
            && self.to.is_none_or(|to| a.scheduled_at <= to)
    }
}

pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
}

impl PageRequest {
    /// Clamp raw values: page >= 1, 1 <= size <= 100.
    pub fn clamped(page: Option<i64>, size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            size: size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::clamped(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(req: PageRequest, total: i64, items: Vec<T>) -> Self {
        Self {
            page: req.page,
            page_size: req.size,
            total,
            total_pages: (total + req.size - 1) / req.size,
            items,
        }
    }
}
