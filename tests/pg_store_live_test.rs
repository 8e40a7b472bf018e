// Runs against a real PostgreSQL database. Skipped unless TEST_DATABASE_URL is set;
// migrations are applied to that database.

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::PgPool;
use tokio::task::JoinSet;
use uuid::Uuid;

use asclepius_server::appointments::{
    Actor, AppointmentError, AppointmentInput, AppointmentManager, AppointmentPatch, AppointmentStatus,
    AppointmentType, AppointmentUpdate, Removal, TimeWindow,
};
use asclepius_server::audit::MemoryAuditRecorder;
use asclepius_server::db;
use asclepius_server::store::{AppointmentStore, PgAppointmentStore, StoreError};

async fn live_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        println!("skipping live PostgreSQL test (set TEST_DATABASE_URL to enable)");
        return None;
    };
    let pool = db::connect_pg(&url, 16).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    Some(pool)
}

async fn add_patient(pool: &PgPool) -> Uuid {
    sqlx::query_scalar("INSERT INTO patient (full_name) VALUES ('Live Test Patient') RETURNING id")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn add_professional(pool: &PgPool) -> Uuid {
    sqlx::query_scalar("INSERT INTO professional (full_name, role) VALUES ('Live Test Doctor', 'DOCTOR') RETURNING id")
        .fetch_one(pool)
        .await
        .unwrap()
}

fn manager(pool: &PgPool) -> AppointmentManager {
    AppointmentManager::new(
        Arc::new(PgAppointmentStore::new(pool.clone())),
        Arc::new(MemoryAuditRecorder::new()),
    )
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 3, 4, h, m, 0).unwrap()
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

#[tokio::test]
async fn worked_example_on_postgres() {
    let Some(pool) = live_pool().await else { return };
    let patient = add_patient(&pool).await;
    let doctor = add_professional(&pool).await;
    let m = manager(&pool);
    let who = Actor::default();

    let first = m.create(&who, booking(patient, doctor, at(10, 0))).await.unwrap();
    assert_matches!(
        m.create(&who, booking(patient, doctor, at(10, 15))).await,
        Err(AppointmentError::SchedulingConflict { conflicting }) if conflicting == vec![first.id]
    );
    m.create(&who, booking(patient, doctor, at(10, 30))).await.unwrap();

    m.remove(&who, first.id, Removal::Cancel { reason: None }).await.unwrap();
    m.create(&who, booking(patient, doctor, at(10, 0))).await.unwrap();
}

#[tokio::test]
async fn returned_records_match_what_postgres_stored() {
    let Some(pool) = live_pool().await else { return };
    let patient = add_patient(&pool).await;
    let doctor = add_professional(&pool).await;
    let m = manager(&pool);
    let who = Actor::default();

    let precise = at(8, 0) + Duration::nanoseconds(372_159_916);
    let created = m.create(&who, booking(patient, doctor, precise)).await.unwrap();
    assert_eq!(m.get(created.id).await.unwrap(), created);

    let p = AppointmentPatch {
        scheduled_at: Some(at(9, 0) + Duration::nanoseconds(387_081_553)),
        status: Some(AppointmentStatus::Confirmed),
        ..Default::default()
    };
    let updated = m.update(&who, created.id, AppointmentUpdate::Partial(p)).await.unwrap();
    assert_eq!(m.get(created.id).await.unwrap(), updated);
}

#[tokio::test]
async fn concurrent_overlapping_creates_admit_one_on_postgres() {
    let Some(pool) = live_pool().await else { return };
    let patient = add_patient(&pool).await;
    let doctor = add_professional(&pool).await;
    let m = Arc::new(manager(&pool));

    let mut tasks = JoinSet::new();
    for i in 0..10 {
        let m = m.clone();
        let when = at(14, 0) + Duration::minutes(i);
        tasks.spawn(async move { m.create(&Actor::default(), booking(patient, doctor, when)).await });
    }

    let mut admitted = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => admitted += 1,
            Err(e) => assert_matches!(e, AppointmentError::SchedulingConflict { .. }),
        }
    }
    assert_eq!(admitted, 1);

    let store = PgAppointmentStore::new(pool.clone());
    let window = TimeWindow::starting_at(at(13, 0), 180);
    assert_eq!(store.overlapping(doctor, window, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn retryable_sqlstates_map_to_serialization() {
    let Some(pool) = live_pool().await else { return };

    for code in ["serialization_failure", "deadlock_detected"] {
        let sql = format!("DO $$ BEGIN RAISE EXCEPTION 'forced' USING ERRCODE = '{code}'; END $$");
        let err = sqlx::query(&sql).execute(&pool).await.unwrap_err();
        assert_matches!(StoreError::from(err), StoreError::Serialization, "{code}");
    }

    let err = sqlx::query("SELECT * FROM no_such_table").execute(&pool).await.unwrap_err();
    assert_matches!(StoreError::from(err), StoreError::Unavailable(_));
}
