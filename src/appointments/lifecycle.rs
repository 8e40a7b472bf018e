// src/appointments/lifecycle.rs

use tracing::debug;

use crate::appointments::error::AppointmentError;
use crate::appointments::model::AppointmentStatus;

impl AppointmentStatus {
    /// Statuses reachable in one step. Terminal statuses have none.
    pub fn next_statuses(&self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match self {
            Scheduled => &[Confirmed, Cancelled, NoShow],
            Confirmed => &[Completed, Cancelled, NoShow],
            Completed | Cancelled | NoShow => &[],
        }
    }

    /// Staying in the same status is always allowed.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        *self == next || self.next_statuses().contains(&next)
    }

    pub fn transition_to(self, next: AppointmentStatus) -> Result<AppointmentStatus, AppointmentError> {
        if self.can_transition_to(next) {
            debug!("status transition {} -> {}", self, next);
            Ok(next)
        } else {
            debug!("rejected status transition {} -> {}", self, next);
            Err(AppointmentError::InvalidTransition { from: self, to: next })
        }
    }
}
