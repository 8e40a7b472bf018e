use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use asclepius_server::appointments::{
    Actor, AppointmentError, AppointmentFilter, AppointmentInput, AppointmentManager, AppointmentPatch,
    AppointmentStatus, AppointmentType, AppointmentUpdate, PageRequest, Reference, Removal,
};
use asclepius_server::audit::MemoryAuditRecorder;
use asclepius_server::store::{MemoryAppointmentStore, StoreError};

struct TestClinic {
    store: MemoryAppointmentStore,
    audit: MemoryAuditRecorder,
    manager: AppointmentManager,
    patient: Uuid,
    doctor: Uuid,
}

async fn clinic() -> TestClinic {
    let store = MemoryAppointmentStore::new();
    let audit = MemoryAuditRecorder::new();
    let patient = store.add_patient().await;
    let doctor = store.add_professional().await;
    let manager = AppointmentManager::new(Arc::new(store.clone()), Arc::new(audit.clone()));
    TestClinic {
        store,
        audit,
        manager,
        patient,
        doctor,
    }
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
}

fn booking(patient: Uuid, professional: Uuid, when: DateTime<Utc>) -> AppointmentInput {
    AppointmentInput {
        patient_id: patient,
        professional_id: professional,
        scheduled_at: when,
        duration: Some(30),
        kind: AppointmentType::Consultation,
        status: None,
        reason: None,
        notes: None,
        cancel_reason: None,
    }
}

fn actor() -> Actor {
    Actor {
        user_id: Some(Uuid::new_v4()),
        ip: Some("127.0.0.1".into()),
        user_agent: Some("integration-test".into()),
    }
}

fn patch() -> AppointmentPatch {
    AppointmentPatch::default()
}

#[tokio::test]
async fn overlapping_booking_is_rejected_and_back_to_back_is_not() {
    let c = clinic().await;

    let first = c.manager.create(&actor(), booking(c.patient, c.doctor, at(10, 0))).await.unwrap();
    assert_eq!(first.status, AppointmentStatus::Scheduled);
    assert_eq!(first.duration, 30);

    let clash = c.manager.create(&actor(), booking(c.patient, c.doctor, at(10, 15))).await;
    assert_matches!(clash, Err(AppointmentError::SchedulingConflict { conflicting }) => {
        assert_eq!(conflicting, vec![first.id]);
    });

    c.manager.create(&actor(), booking(c.patient, c.doctor, at(10, 30))).await.unwrap();
    assert_eq!(c.store.snapshot().await.len(), 2);
}

#[tokio::test]
async fn distinct_professionals_never_conflict() {
    let c = clinic().await;
    let other = c.store.add_professional().await;

    c.manager.create(&actor(), booking(c.patient, c.doctor, at(9, 0))).await.unwrap();
    c.manager.create(&actor(), booking(c.patient, other, at(9, 0))).await.unwrap();
    c.manager.create(&actor(), booking(c.patient, other, at(9, 30))).await.unwrap();
}

#[tokio::test]
async fn cancelled_appointments_free_their_slot() {
    let c = clinic().await;
    let first = c.manager.create(&actor(), booking(c.patient, c.doctor, at(14, 0))).await.unwrap();

    c.manager
        .remove(&actor(), first.id, Removal::Cancel { reason: None })
        .await
        .unwrap();

    c.manager.create(&actor(), booking(c.patient, c.doctor, at(14, 0))).await.unwrap();
}

#[tokio::test]
async fn unknown_references_are_rejected_without_writing() {
    let c = clinic().await;

    let missing_patient = c.manager.create(&actor(), booking(Uuid::new_v4(), c.doctor, at(8, 0))).await;
    assert_matches!(missing_patient, Err(AppointmentError::ReferenceNotFound(Reference::Patient)));

    let missing_doctor = c.manager.create(&actor(), booking(c.patient, Uuid::new_v4(), at(8, 0))).await;
    assert_matches!(missing_doctor, Err(AppointmentError::ReferenceNotFound(Reference::Professional)));

    assert!(c.store.snapshot().await.is_empty());
    assert!(c.audit.entries().await.is_empty());
}

#[tokio::test]
async fn soft_cancel_keeps_the_record() {
    let c = clinic().await;
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(11, 0))).await.unwrap();

    c.manager
        .remove(&actor(), a.id, Removal::Cancel { reason: Some("patient called in sick".into()) })
        .await
        .unwrap();

    let fetched = c.manager.get(a.id).await.unwrap();
    assert_eq!(fetched.status, AppointmentStatus::Cancelled);
    assert_eq!(fetched.cancel_reason.as_deref(), Some("patient called in sick"));
}

#[tokio::test]
async fn cancel_without_reason_uses_default_and_is_idempotent() {
    let c = clinic().await;
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(11, 0))).await.unwrap();

    c.manager.remove(&actor(), a.id, Removal::Cancel { reason: Some("  ".into()) }).await.unwrap();
    c.manager.remove(&actor(), a.id, Removal::Cancel { reason: None }).await.unwrap();

    assert_eq!(c.manager.get(a.id).await.unwrap().cancel_reason.as_deref(), Some("Cancelled"));
    let actions: Vec<_> = c.audit.entries().await.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["CREATE_APPOINTMENT", "CANCEL_APPOINTMENT"]);
}

#[tokio::test]
async fn completed_appointments_cannot_be_cancelled() {
    let c = clinic().await;
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(11, 0))).await.unwrap();
    for status in [AppointmentStatus::Confirmed, AppointmentStatus::Completed] {
        let p = AppointmentPatch { status: Some(status), ..patch() };
        c.manager.update(&actor(), a.id, AppointmentUpdate::Partial(p)).await.unwrap();
    }

    let res = c.manager.remove(&actor(), a.id, Removal::Cancel { reason: None }).await;
    assert_matches!(
        res,
        Err(AppointmentError::InvalidTransition {
            from: AppointmentStatus::Completed,
            to: AppointmentStatus::Cancelled
        })
    );
}

#[tokio::test]
async fn purge_removes_the_record_from_any_status() {
    let c = clinic().await;
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(12, 0))).await.unwrap();
    c.manager.remove(&actor(), a.id, Removal::Cancel { reason: None }).await.unwrap();

    c.manager.remove(&actor(), a.id, Removal::Purge).await.unwrap();

    assert_matches!(c.manager.get(a.id).await, Err(AppointmentError::NotFound));
    assert_matches!(
        c.manager.remove(&actor(), a.id, Removal::Purge).await,
        Err(AppointmentError::NotFound)
    );
    let last = c.audit.entries().await.pop().unwrap();
    assert_eq!(last.action.as_str(), "DELETE_APPOINTMENT_HARD");
}

#[tokio::test]
async fn list_is_newest_first_and_paginated() {
    let c = clinic().await;
    for hour in 8..13 {
        c.manager.create(&actor(), booking(c.patient, c.doctor, at(hour, 0))).await.unwrap();
    }

    let page = c
        .manager
        .list(&AppointmentFilter::default(), PageRequest::clamped(Some(1), Some(2)))
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
    let times: Vec<_> = page.items.iter().map(|a| a.scheduled_at).collect();
    assert_eq!(times, vec![at(12, 0), at(11, 0)]);

    let last = c
        .manager
        .list(&AppointmentFilter::default(), PageRequest::clamped(Some(3), Some(2)))
        .await
        .unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].scheduled_at, at(8, 0));
}

#[tokio::test]
async fn list_filters_by_status_and_range() {
    let c = clinic().await;
    let early = c.manager.create(&actor(), booking(c.patient, c.doctor, at(8, 0))).await.unwrap();
    c.manager.create(&actor(), booking(c.patient, c.doctor, at(9, 0))).await.unwrap();
    c.manager.create(&actor(), booking(c.patient, c.doctor, at(10, 0))).await.unwrap();
    c.manager.remove(&actor(), early.id, Removal::Cancel { reason: None }).await.unwrap();

    let cancelled = AppointmentFilter {
        status: Some(AppointmentStatus::Cancelled),
        ..Default::default()
    };
    let page = c.manager.list(&cancelled, PageRequest::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, early.id);

    let window = AppointmentFilter {
        from: Some(at(9, 0)),
        to: Some(at(10, 0)),
        ..Default::default()
    };
    assert_eq!(c.manager.list(&window, PageRequest::default()).await.unwrap().total, 2);
}

#[tokio::test]
async fn completing_a_scheduled_appointment_is_an_invalid_transition() {
    let c = clinic().await;
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(15, 0))).await.unwrap();

    let p = AppointmentPatch {
        status: Some(AppointmentStatus::Completed),
        ..patch()
    };
    assert_matches!(
        c.manager.update(&actor(), a.id, AppointmentUpdate::Partial(p)).await,
        Err(AppointmentError::InvalidTransition { .. })
    );
    assert_eq!(c.manager.get(a.id).await.unwrap().status, AppointmentStatus::Scheduled);
}

#[tokio::test]
async fn update_returns_exactly_what_get_returns() {
    let c = clinic().await;
    let mut input = booking(c.patient, c.doctor, at(9, 0));
    input.reason = Some("annual check".into());
    let a = c.manager.create(&actor(), input).await.unwrap();

    let p = AppointmentPatch {
        scheduled_at: Some(at(9, 45)),
        notes: Some(Some("fasting".into())),
        ..patch()
    };
    let updated = c.manager.update(&actor(), a.id, AppointmentUpdate::Partial(p)).await.unwrap();

    assert_eq!(updated.scheduled_at, at(9, 45));
    assert_eq!(updated.notes.as_deref(), Some("fasting"));
    assert_eq!(updated.reason.as_deref(), Some("annual check"));
    assert_eq!(updated.created_at, a.created_at);
    assert_eq!(c.manager.get(a.id).await.unwrap(), updated);

    let entry = c.audit.entries().await.pop().unwrap();
    assert_eq!(entry.action.as_str(), "PATCH_APPOINTMENT");
    let details = entry.details.unwrap();
    assert_eq!(details["notes"], "fasting");
    assert!(details.get("reason").is_none());
}

#[tokio::test]
async fn moving_into_an_occupied_slot_conflicts_but_self_overlap_does_not() {
    let c = clinic().await;
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(9, 0))).await.unwrap();
    let b = c.manager.create(&actor(), booking(c.patient, c.doctor, at(10, 0))).await.unwrap();

    // extending in place only overlaps itself
    let longer = AppointmentPatch { duration: Some(60), ..patch() };
    c.manager.update(&actor(), a.id, AppointmentUpdate::Partial(longer)).await.unwrap();

    let onto_b = AppointmentPatch { scheduled_at: Some(at(9, 50)), ..patch() };
    assert_matches!(
        c.manager.update(&actor(), a.id, AppointmentUpdate::Partial(onto_b)).await,
        Err(AppointmentError::SchedulingConflict { conflicting }) if conflicting == vec![b.id]
    );
}

#[tokio::test]
async fn patching_to_an_unknown_professional_is_rejected() {
    let c = clinic().await;
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(9, 0))).await.unwrap();

    let p = AppointmentPatch { professional_id: Some(Uuid::new_v4()), ..patch() };
    assert_matches!(
        c.manager.update(&actor(), a.id, AppointmentUpdate::Partial(p)).await,
        Err(AppointmentError::ReferenceNotFound(Reference::Professional))
    );
    assert_eq!(c.manager.get(a.id).await.unwrap(), a);
}

#[tokio::test]
async fn moving_onto_another_professionals_booked_slot_conflicts() {
    let c = clinic().await;
    let other = c.store.add_professional().await;
    let mine = c.manager.create(&actor(), booking(c.patient, c.doctor, at(9, 0))).await.unwrap();
    let theirs = c.manager.create(&actor(), booking(c.patient, other, at(11, 0))).await.unwrap();

    let p = AppointmentPatch {
        professional_id: Some(other),
        scheduled_at: Some(at(11, 15)),
        ..patch()
    };
    assert_matches!(
        c.manager.update(&actor(), mine.id, AppointmentUpdate::Partial(p)).await,
        Err(AppointmentError::SchedulingConflict { conflicting }) if conflicting == vec![theirs.id]
    );

    // a free slot on the other schedule is fine
    let p = AppointmentPatch {
        professional_id: Some(other),
        scheduled_at: Some(at(11, 30)),
        ..patch()
    };
    let moved = c.manager.update(&actor(), mine.id, AppointmentUpdate::Partial(p)).await.unwrap();
    assert_eq!(moved.professional_id, other);
}

#[tokio::test]
async fn sub_microsecond_times_are_returned_as_stored() {
    let c = clinic().await;
    let precise = at(9, 0) + Duration::nanoseconds(372_159_916);
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, precise)).await.unwrap();

    assert_eq!(a.scheduled_at, at(9, 0) + Duration::microseconds(372_159));
    assert_eq!(a.created_at.timestamp_subsec_nanos() % 1_000, 0);

    let p = AppointmentPatch {
        scheduled_at: Some(at(10, 0) + Duration::nanoseconds(387_081_553)),
        ..patch()
    };
    let updated = c.manager.update(&actor(), a.id, AppointmentUpdate::Partial(p)).await.unwrap();
    assert_eq!(updated.scheduled_at, at(10, 0) + Duration::microseconds(387_081));
    assert_eq!(updated.updated_at.timestamp_subsec_nanos() % 1_000, 0);
}

#[tokio::test]
async fn create_accepts_a_cancel_reason() {
    let c = clinic().await;
    let mut input = booking(c.patient, c.doctor, at(9, 0));
    input.status = Some(AppointmentStatus::Cancelled);
    input.cancel_reason = Some("entered after the fact".into());

    let a = c.manager.create(&actor(), input).await.unwrap();
    assert_eq!(a.cancel_reason.as_deref(), Some("entered after the fact"));

    // cancelled records hold no slot
    c.manager.create(&actor(), booking(c.patient, c.doctor, at(9, 0))).await.unwrap();
}

#[tokio::test]
async fn full_update_revalidates_references() {
    let c = clinic().await;
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(9, 0))).await.unwrap();

    let res = c
        .manager
        .update(&actor(), a.id, AppointmentUpdate::Full(booking(Uuid::new_v4(), c.doctor, at(9, 0))))
        .await;
    assert_matches!(res, Err(AppointmentError::ReferenceNotFound(Reference::Patient)));

    let mut full = booking(c.patient, c.doctor, at(9, 0));
    full.kind = AppointmentType::Exam;
    assert_matches!(
        c.manager.update(&actor(), a.id, AppointmentUpdate::Full(full)).await,
        Err(AppointmentError::Validation(issues)) if issues[0].field == "type"
    );

    let missing = c
        .manager
        .update(&actor(), Uuid::new_v4(), AppointmentUpdate::Full(booking(c.patient, c.doctor, at(9, 0))))
        .await;
    assert_matches!(missing, Err(AppointmentError::NotFound));
}

#[tokio::test]
async fn concurrent_overlapping_creates_admit_exactly_one() {
    let c = clinic().await;
    let who = actor();

    let (left, right) = tokio::join!(
        c.manager.create(&who, booking(c.patient, c.doctor, at(16, 0))),
        c.manager.create(&who, booking(c.patient, c.doctor, at(16, 10))),
    );

    assert_eq!([left.is_ok(), right.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert_eq!(c.store.snapshot().await.len(), 1);
}

#[tokio::test]
async fn serialization_failures_are_retried() {
    let c = clinic().await;

    c.store.fail_next_commits(2);
    c.manager.create(&actor(), booking(c.patient, c.doctor, at(7, 0))).await.unwrap();
    assert_eq!(c.store.snapshot().await.len(), 1);

    c.store.fail_next_commits(10);
    let res = c.manager.create(&actor(), booking(c.patient, c.doctor, at(8, 0))).await;
    assert_matches!(res, Err(AppointmentError::Store(StoreError::Serialization)));
    assert_eq!(c.store.snapshot().await.len(), 1);
}

#[tokio::test]
async fn audit_outage_does_not_fail_the_mutation() {
    let c = clinic().await;
    c.audit.set_failing(true);

    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(13, 0))).await.unwrap();

    assert_eq!(c.manager.get(a.id).await.unwrap().id, a.id);
    assert!(c.audit.entries().await.is_empty());
}

#[tokio::test]
async fn create_audit_carries_actor() {
    let c = clinic().await;
    let who = actor();

    let a = c.manager.create(&who, booking(c.patient, c.doctor, at(13, 0))).await.unwrap();

    let entries = c.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action.as_str(), "CREATE_APPOINTMENT");
    assert_eq!(entries[0].entity, "Appointment");
    assert_eq!(entries[0].user_id, who.user_id);
    assert_eq!(entries[0].entity_id, Some(a.id.to_string()));
    assert_eq!(entries[0].user_agent.as_deref(), Some("integration-test"));
}

#[tokio::test]
async fn conflict_check_reports_without_writing() {
    let c = clinic().await;
    let a = c.manager.create(&actor(), booking(c.patient, c.doctor, at(10, 0))).await.unwrap();

    let hits = c.manager.check_conflicts(c.doctor, at(10, 20), Some(15), None).await.unwrap();
    assert_eq!(hits.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id]);

    let excluded = c.manager.check_conflicts(c.doctor, at(10, 20), None, Some(a.id)).await.unwrap();
    assert!(excluded.is_empty());

    assert_matches!(
        c.manager.check_conflicts(c.doctor, at(10, 20), Some(0), None).await,
        Err(AppointmentError::Validation(_))
    );
}
