//! Database integration tests using SQLx
//!
//! Every test gets a fresh database from the #[sqlx::test] macro with the
//! crate's migrations applied, and it is dropped afterwards.
//!
//! Coverage includes:
//! - Job rows: creation, claims, leases, patches, listing and counts
//! - Queue delivery, visibility and acknowledgment
//! - Student and vaccination record inserts

use sqlx::PgPool;
use std::time::Duration;
use svp_common::{JobKind, JobStatus, Pagination};
use svp_server::bulk::models::{Job, JobPatch, NewJob, StudentRecord, VaccinationRecord};
use svp_server::bulk::{JobStore, PgJobStore, StoreError};
use svp_server::config::QueueConfig;
use svp_server::queue::{MessageQueue, PgQueue};
use svp_server::records::{
    DriveDirectory, PgRecords, RecordError, StudentRepository, VaccinationRepository,
};
use uuid::Uuid;

const LEASE: Duration = Duration::from_secs(60);

fn new_job(kind: JobKind) -> NewJob {
    let request_id = Uuid::new_v4();
    NewJob {
        request_id,
        request_type: kind,
        file_name: "students.xlsx".to_string(),
        source_key: format!("uploads/{}/students.xlsx", request_id),
    }
}

/// Create a job and claim it, returning the row and the lease token
async fn claimed_job(store: &PgJobStore, kind: JobKind) -> (Job, Uuid) {
    let job = store.create(new_job(kind)).await.unwrap();
    let token = Uuid::new_v4();
    let claimed = store
        .claim(job.request_id, token, LEASE)
        .await
        .unwrap()
        .expect("pending job is claimable");
    (claimed, token)
}

fn student(class: &str, roll_number: &str) -> StudentRecord {
    StudentRecord {
        name: "Asha Rao".to_string(),
        class: class.to_string(),
        gender: "F".to_string(),
        roll_number: roll_number.to_string(),
        phone_no: "9876500001".to_string(),
    }
}

async fn insert_drive(pool: &PgPool) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO vaccination_inventory (vaccine_name, drive_date, doses, classes)
        VALUES ('MMR', CURRENT_DATE, 50, '5,6')
        RETURNING id
        "#,
    )
    .fetch_one(pool)
    .await
    .unwrap()
}

// ============================================================================
// Job Store Tests
// ============================================================================

#[sqlx::test]
async fn test_create_job_starts_pending(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let new = new_job(JobKind::StudentRecord);

    let job = store.create(new.clone()).await.unwrap();

    assert_eq!(job.request_id, new.request_id);
    assert_eq!(job.request_type, JobKind::StudentRecord);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.total_records, 0);
    assert_eq!(job.processed_records, 0);
    assert!(job.report_key.is_none());
    assert!(job.error_message.is_none());

    let fetched = store.get(new.request_id).await.unwrap().unwrap();
    assert_eq!(fetched, job);
    assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
}

#[sqlx::test]
async fn test_claim_has_a_single_winner(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = store.create(new_job(JobKind::StudentRecord)).await.unwrap();

    let (first, second) = tokio::join!(
        store.claim(job.request_id, Uuid::new_v4(), LEASE),
        store.claim(job.request_id, Uuid::new_v4(), LEASE),
    );
    let winners = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].status, JobStatus::Processing);
    assert!(store
        .claim(job.request_id, Uuid::new_v4(), LEASE)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .claim(Uuid::new_v4(), Uuid::new_v4(), LEASE)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
async fn test_expired_lease_moves_to_new_owner(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = store.create(new_job(JobKind::VaccineRecord)).await.unwrap();
    let stale = Uuid::new_v4();
    store
        .claim(job.request_id, stale, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();

    let current = Uuid::new_v4();
    let taken = store.claim(job.request_id, current, LEASE).await.unwrap();
    assert!(taken.is_some());

    let patch = JobPatch::default().with_total_records(3);
    assert!(matches!(
        store.update(job.id, stale, &patch).await,
        Err(StoreError::LeaseLost { .. })
    ));
    assert!(matches!(
        store.renew(job.id, stale, LEASE).await,
        Err(StoreError::LeaseLost { .. })
    ));

    store.renew(job.id, current, LEASE).await.unwrap();
    let updated = store.update(job.id, current, &patch).await.unwrap();
    assert_eq!(updated.total_records, 3);
}

#[sqlx::test]
async fn test_patch_writes_zero_counts_and_clears_error(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let (job, token) = claimed_job(&store, JobKind::VaccineRecord).await;

    let flagged = store
        .update(
            job.id,
            token,
            &JobPatch::default()
                .with_total_records(0)
                .with_error("transient"),
        )
        .await
        .unwrap();
    assert_eq!(flagged.status, JobStatus::Processing);
    assert_eq!(flagged.error_message.as_deref(), Some("transient"));

    let done = store
        .update(
            job.id,
            token,
            &JobPatch::status(JobStatus::Processed)
                .with_processed_records(0)
                .with_report_key(format!("reports/{}/report.xlsx", job.request_id))
                .clear_error(),
        )
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Processed);
    assert_eq!(done.total_records, 0);
    assert_eq!(done.processed_records, 0);
    assert!(done.error_message.is_none());
    assert!(done.report_key.is_some());
    assert!(done.updated_at >= job.updated_at);
}

#[sqlx::test]
async fn test_terminal_job_refuses_further_writes(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let (job, token) = claimed_job(&store, JobKind::StudentRecord).await;
    store
        .update(job.id, token, &JobPatch::status(JobStatus::Failed).with_error("Empty file"))
        .await
        .unwrap();

    let again = store
        .update(job.id, token, &JobPatch::status(JobStatus::Processed))
        .await;
    assert!(matches!(again, Err(StoreError::LeaseLost { .. })));
    assert!(matches!(
        store.renew(job.id, token, LEASE).await,
        Err(StoreError::LeaseLost { .. })
    ));
    assert!(store
        .claim(job.request_id, Uuid::new_v4(), LEASE)
        .await
        .unwrap()
        .is_none());

    let stored = store.get(job.request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("Empty file"));
}

#[sqlx::test]
async fn test_processed_above_total_is_refused_by_database(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let (job, token) = claimed_job(&store, JobKind::StudentRecord).await;

    let result = store
        .update(
            job.id,
            token,
            &JobPatch::default()
                .with_total_records(1)
                .with_processed_records(2),
        )
        .await;

    assert!(matches!(result, Err(StoreError::Database(_))));
}

#[sqlx::test]
async fn test_update_unknown_job_is_not_found(pool: PgPool) {
    let store = PgJobStore::new(pool);

    let result = store
        .update(42, Uuid::new_v4(), &JobPatch::status(JobStatus::Processed))
        .await;

    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[sqlx::test]
async fn test_list_is_newest_first_and_paged(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let mut created = Vec::new();
    for _ in 0..4 {
        created.push(store.create(new_job(JobKind::StudentRecord)).await.unwrap());
    }

    assert_eq!(store.count(None).await.unwrap(), 4);

    let first_page = store.list(None, Pagination::new(Some(3), None)).await.unwrap();
    let newest: Vec<Uuid> = first_page.iter().map(|j| j.request_id).collect();
    assert_eq!(
        newest,
        vec![created[3].request_id, created[2].request_id, created[1].request_id]
    );

    let second_page = store
        .list(None, Pagination::new(Some(3), Some(3)))
        .await
        .unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].request_id, created[0].request_id);

    let target = created[1].request_id;
    assert_eq!(store.count(Some(target)).await.unwrap(), 1);
    let only = store.list(Some(target), Pagination::default()).await.unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].request_id, target);

    assert_eq!(store.count(Some(Uuid::new_v4())).await.unwrap(), 0);
}

// ============================================================================
// Queue Tests
// ============================================================================

fn queue_config(name: &str, visibility_timeout_secs: u64) -> QueueConfig {
    QueueConfig {
        name: name.to_string(),
        visibility_timeout_secs,
        ..QueueConfig::default()
    }
}

#[sqlx::test]
async fn test_claimed_message_is_hidden_until_acked(pool: PgPool) {
    let queue = PgQueue::new(pool, &queue_config("bulk-upload", 300));
    queue.publish("first").await.unwrap();
    queue.publish("second").await.unwrap();

    let batch = queue.receive(10).await.unwrap();
    let bodies: Vec<&str> = batch.iter().map(|d| d.body.as_str()).collect();
    assert_eq!(bodies, vec!["first", "second"]);
    assert!(batch.iter().all(|d| d.attempts == 1));

    assert!(queue.receive(10).await.unwrap().is_empty());

    for delivery in &batch {
        queue.ack(delivery.id).await.unwrap();
    }
    assert!(queue.receive(10).await.unwrap().is_empty());
}

#[sqlx::test]
async fn test_unacked_message_is_redelivered_after_timeout(pool: PgPool) {
    let queue = PgQueue::new(pool, &queue_config("bulk-upload", 0));
    queue.publish("job").await.unwrap();

    let first = queue.receive(1).await.unwrap();
    assert_eq!(first.len(), 1);

    let again = queue.receive(1).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].id, first[0].id);
    assert_eq!(again[0].attempts, 2);
}

#[sqlx::test]
async fn test_receive_respects_batch_size_and_queue_name(pool: PgPool) {
    let queue = PgQueue::new(pool.clone(), &queue_config("bulk-upload", 300));
    let other = PgQueue::new(pool, &queue_config("bulk-upload-other", 300));
    for i in 0..3 {
        queue.publish(&format!("job-{}", i)).await.unwrap();
    }

    assert!(queue.receive(0).await.unwrap().is_empty());
    assert!(other.receive(10).await.unwrap().is_empty());
    assert_eq!(queue.receive(2).await.unwrap().len(), 2);
    assert_eq!(queue.receive(2).await.unwrap().len(), 1);
}

// ============================================================================
// Record Tests
// ============================================================================

#[sqlx::test]
async fn test_student_insert_and_duplicate(pool: PgPool) {
    let records = PgRecords::new(pool);

    let id = records.create_student(&student("5", "1")).await.unwrap();
    assert!(records.student_exists(id).await.unwrap());
    assert!(!records.student_exists(id + 1).await.unwrap());

    let duplicate = records.create_student(&student("5", "1")).await;
    assert!(matches!(duplicate, Err(RecordError::Duplicate(_))));

    records.create_student(&student("6", "1")).await.unwrap();
}

#[sqlx::test]
async fn test_vaccination_insert_and_duplicate(pool: PgPool) {
    let records = PgRecords::new(pool.clone());
    let student_id = records.create_student(&student("5", "1")).await.unwrap();
    let drive_id = insert_drive(&pool).await;

    assert!(records.drive_exists(drive_id).await.unwrap());
    assert!(!records.drive_exists(drive_id + 1).await.unwrap());

    let record = VaccinationRecord {
        student_id,
        drive_id,
    };
    records.create_vaccination_record(&record).await.unwrap();

    let duplicate = records.create_vaccination_record(&record).await;
    assert!(matches!(duplicate, Err(RecordError::Duplicate(_))));
}
