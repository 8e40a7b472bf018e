// src/appointments/error.rs

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::appointments::model::AppointmentStatus;
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: &'static str,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Patient,
    Professional,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Patient => f.write_str("patient"),
            Reference::Professional => f.write_str("professional"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("validation failed ({} issue(s))", .0.len())]
    Validation(Vec<FieldIssue>),

    #[error("{0} not found")]
    ReferenceNotFound(Reference),

    #[error("appointment not found")]
    NotFound,

    #[error("professional already has an active appointment overlapping this window")]
    SchedulingConflict { conflicting: Vec<Uuid> },

    #[error("cannot transition appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl AppointmentError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        AppointmentError::Validation(vec![FieldIssue::new(field, message)])
    }
}
