pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod model;

pub use error::{AppointmentError, FieldIssue, Reference};
pub use manager::{AppointmentManager, DEFAULT_TX_RETRY_LIMIT};
pub use model::{
    Actor, Appointment, AppointmentFilter, AppointmentInput, AppointmentPatch, AppointmentStatus,
    AppointmentType, AppointmentUpdate, Page, PageRequest, Removal, TimeWindow,
};
