//! In-memory implementations of every seam trait, plus workbook builders
//!
//! Each integration test binary compiles this module on its own, so not
//! every helper is used everywhere.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use svp_common::{JobKind, JobStatus, Pagination};
use uuid::Uuid;

use svp_server::bulk::models::{Job, JobPatch, NewJob, StudentRecord, VaccinationRecord};
use svp_server::bulk::parser::{read_workbook, Sheet};
use svp_server::bulk::store::{JobStore, StoreError};
use svp_server::bulk::{BulkWriter, Pipeline};
use svp_server::config::{BulkConfig, RowFailurePolicy};
use svp_server::features::FeatureState;
use svp_server::queue::{Delivery, MessageQueue, QueueError};
use svp_server::records::{DriveDirectory, RecordError, StudentRepository, VaccinationRepository};
use svp_server::storage::{upload_key, BlobStore};

// ============================================================================
// Job store
// ============================================================================

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
    leases: Mutex<HashMap<i64, (Uuid, Instant)>>,
    fail_updates: AtomicBool,
}

impl MemoryJobStore {
    pub fn job(&self, request_id: Uuid) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.request_id == request_id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    /// Overwrite a job row directly, bypassing the status machine
    pub fn force_status(&self, request_id: Uuid, status: JobStatus) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.request_id == request_id) {
            job.status = status;
        }
    }

    /// Put the job in PROCESSING under a lease some other worker holds
    pub fn lease_to_other_worker(&self, request_id: Uuid, ttl: Duration) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.request_id == request_id) {
            job.status = JobStatus::Processing;
            self.leases
                .lock()
                .unwrap()
                .insert(job.id, (Uuid::new_v4(), Instant::now() + ttl));
        }
    }

    /// Hand the job's lease to some other worker, as a takeover would
    pub fn steal_lease(&self, request_id: Uuid) {
        let jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter().find(|j| j.request_id == request_id) {
            if let Some(lease) = self.leases.lock().unwrap().get_mut(&job.id) {
                lease.0 = Uuid::new_v4();
            }
        }
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("job store offline".to_string()));
        }
        Ok(())
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        let created = Job {
            id: jobs.len() as i64 + 1,
            request_id: job.request_id,
            request_type: job.request_type,
            status: JobStatus::Pending,
            file_name: job.file_name,
            source_key: job.source_key,
            report_key: None,
            total_records: 0,
            processed_records: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        jobs.push(created.clone());
        Ok(created)
    }

    async fn get(&self, request_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.job(request_id))
    }

    async fn claim(
        &self,
        request_id: Uuid,
        token: Uuid,
        ttl: Duration,
    ) -> Result<Option<Job>, StoreError> {
        self.check_online()?;

        let mut jobs = self.jobs.lock().unwrap();
        let mut leases = self.leases.lock().unwrap();
        let Some(job) = jobs.iter_mut().find(|j| j.request_id == request_id) else {
            return Ok(None);
        };

        let expired = leases
            .get(&job.id)
            .map_or(true, |(_, until)| *until <= Instant::now());
        let claimable = job.status == JobStatus::Pending
            || (job.status == JobStatus::Processing && expired);
        if !claimable {
            return Ok(None);
        }

        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        leases.insert(job.id, (token, Instant::now() + ttl));
        Ok(Some(job.clone()))
    }

    async fn renew(&self, id: i64, token: Uuid, ttl: Duration) -> Result<(), StoreError> {
        self.check_online()?;

        let jobs = self.jobs.lock().unwrap();
        let mut leases = self.leases.lock().unwrap();
        let processing = jobs
            .iter()
            .any(|j| j.id == id && j.status == JobStatus::Processing);
        match leases.get_mut(&id) {
            Some((held, until)) if *held == token && processing => {
                *until = Instant::now() + ttl;
                Ok(())
            },
            _ => Err(StoreError::LeaseLost { id }),
        }
    }

    async fn update(&self, id: i64, token: Uuid, patch: &JobPatch) -> Result<Job, StoreError> {
        self.check_online()?;

        let mut jobs = self.jobs.lock().unwrap();
        let leases = self.leases.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let held = leases.get(&id).is_some_and(|(held, _)| *held == token);
        if !held || job.status != JobStatus::Processing {
            return Err(StoreError::LeaseLost { id });
        }

        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(key) = &patch.report_key {
            job.report_key = Some(key.clone());
        }
        if let Some(total) = patch.total_records {
            job.total_records = total;
        }
        if let Some(processed) = patch.processed_records {
            job.processed_records = processed;
        }
        if let Some(message) = &patch.error_message {
            job.error_message = message.clone();
        }
        job.updated_at = Utc::now();

        Ok(job.clone())
    }

    async fn list(
        &self,
        request_id: Option<Uuid>,
        page: Pagination,
    ) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| request_id.map_or(true, |id| j.request_id == id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(jobs
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn count(&self, request_id: Option<Uuid>) -> Result<i64, StoreError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| request_id.map_or(true, |id| j.request_id == id))
            .count() as i64)
    }
}

// ============================================================================
// Blob store
// ============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts_under: Mutex<Option<String>>,
}

impl MemoryBlobStore {
    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Reject every upload whose key starts with `prefix`
    pub fn fail_puts_under(&self, prefix: &str) {
        *self.fail_puts_under.lock().unwrap() = Some(prefix.to_string());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_file(&self, key: &str, path: &Path, _content_type: &str) -> Result<()> {
        if let Some(prefix) = self.fail_puts_under.lock().unwrap().as_deref() {
            if key.starts_with(prefix) {
                return Err(anyhow!("blob store rejected {}", key));
            }
        }
        let bytes = tokio::fs::read(path).await?;
        self.insert(key, bytes);
        Ok(())
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        let bytes = self
            .object(key)
            .ok_or_else(|| anyhow!("no object at {}", key))?;
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        Ok(format!(
            "https://blobs.test/{}?expires={}",
            key,
            expires_in.as_secs()
        ))
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Default)]
pub struct MemoryQueue {
    next_id: AtomicUsize,
    ready: Mutex<VecDeque<Delivery>>,
    in_flight: Mutex<HashMap<i64, Delivery>>,
    acked: Mutex<Vec<i64>>,
    delivered: AtomicUsize,
}

impl MemoryQueue {
    pub fn acked(&self) -> Vec<i64> {
        self.acked.lock().unwrap().clone()
    }

    /// Deliveries handed out so far, redeliveries included
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn in_flight_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.in_flight.lock().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Bodies that have been published but not yet received
    pub fn ready_bodies(&self) -> Vec<String> {
        self.ready
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.body.clone())
            .collect()
    }

    /// Make every unacknowledged delivery available again
    pub fn expire_in_flight(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut ready = self.ready.lock().unwrap();
        let mut expired: Vec<Delivery> = in_flight.drain().map(|(_, d)| d).collect();
        expired.sort_by_key(|d| d.id);
        ready.extend(expired);
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn publish(&self, body: &str) -> Result<(), QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        self.ready.lock().unwrap().push_back(Delivery {
            id,
            body: body.to_string(),
            attempts: 0,
        });
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let mut ready = self.ready.lock().unwrap();
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut out = Vec::new();
        while out.len() < max {
            let Some(mut delivery) = ready.pop_front() else {
                break;
            };
            delivery.attempts += 1;
            self.delivered.fetch_add(1, Ordering::SeqCst);
            in_flight.insert(delivery.id, delivery.clone());
            out.push(delivery);
        }
        Ok(out)
    }

    async fn ack(&self, delivery_id: i64) -> Result<(), QueueError> {
        self.in_flight.lock().unwrap().remove(&delivery_id);
        self.acked.lock().unwrap().push(delivery_id);
        Ok(())
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Default)]
pub struct MemoryRecords {
    students: Mutex<Vec<StudentRecord>>,
    vaccinations: Mutex<Vec<VaccinationRecord>>,
    known_students: Mutex<HashSet<i64>>,
    drives: Mutex<HashSet<i64>>,
    create_calls: AtomicUsize,
    insert_delay: Duration,
    fail_inserts: AtomicBool,
}

impl MemoryRecords {
    pub fn with_students(self, ids: &[i64]) -> Self {
        self.known_students.lock().unwrap().extend(ids);
        self
    }

    pub fn with_drives(self, ids: &[i64]) -> Self {
        self.drives.lock().unwrap().extend(ids);
        self
    }

    /// Make every insert take `delay`
    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = delay;
        self
    }

    /// Make every insert fail the way a dropped database connection does
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    async fn begin_insert(&self) -> Result<(), RecordError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if !self.insert_delay.is_zero() {
            tokio::time::sleep(self.insert_delay).await;
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RecordError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    pub fn students(&self) -> Vec<StudentRecord> {
        self.students.lock().unwrap().clone()
    }

    pub fn vaccinations(&self) -> Vec<VaccinationRecord> {
        self.vaccinations.lock().unwrap().clone()
    }

    /// Number of record-creation calls of either kind
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StudentRepository for MemoryRecords {
    async fn create_student(&self, record: &StudentRecord) -> Result<i64, RecordError> {
        self.begin_insert().await?;
        let mut students = self.students.lock().unwrap();
        if students
            .iter()
            .any(|s| s.class == record.class && s.roll_number == record.roll_number)
        {
            return Err(RecordError::Duplicate(format!(
                "student with roll number {} in class {} already exists",
                record.roll_number, record.class
            )));
        }
        students.push(record.clone());
        let id = 1000 + students.len() as i64;
        self.known_students.lock().unwrap().insert(id);
        Ok(id)
    }

    async fn student_exists(&self, student_id: i64) -> Result<bool, RecordError> {
        Ok(self.known_students.lock().unwrap().contains(&student_id))
    }
}

#[async_trait]
impl VaccinationRepository for MemoryRecords {
    async fn create_vaccination_record(
        &self,
        record: &VaccinationRecord,
    ) -> Result<i64, RecordError> {
        self.begin_insert().await?;
        let mut vaccinations = self.vaccinations.lock().unwrap();
        if vaccinations.contains(record) {
            return Err(RecordError::Duplicate(format!(
                "vaccination of student {} in drive {} already exists",
                record.student_id, record.drive_id
            )));
        }
        vaccinations.push(*record);
        Ok(vaccinations.len() as i64)
    }
}

#[async_trait]
impl DriveDirectory for MemoryRecords {
    async fn drive_exists(&self, drive_id: i64) -> Result<bool, RecordError> {
        Ok(self.drives.lock().unwrap().contains(&drive_id))
    }
}

// ============================================================================
// Workbooks
// ============================================================================

pub const STUDENT_HEADER: [&str; 5] = ["Name", "Class", "Gender", "Roll Number", "Phone Number"];
pub const VACCINATION_HEADER: [&str; 2] = ["Student Id", "Drive Id"];

/// An `.xlsx` file whose first sheet holds `rows` as text cells
pub fn xlsx_bytes(rows: &[&[&str]]) -> Vec<u8> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            if !cell.is_empty() {
                sheet.write_string(r as u32, c as u16, *cell).unwrap();
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}

/// Parse a report stored in the blob store
pub fn read_report(bytes: &[u8]) -> Sheet {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");
    std::fs::write(&path, bytes).unwrap();
    read_workbook(&path).unwrap()
}

/// A student sheet with `count` distinct, valid rows
pub fn student_sheet(count: usize) -> Vec<u8> {
    let rows: Vec<[String; 5]> = (1..=count)
        .map(|i| {
            [
                format!("Student {}", i),
                "5".to_string(),
                "F".to_string(),
                i.to_string(),
                format!("98765{:05}", i),
            ]
        })
        .collect();
    let cells: Vec<Vec<&str>> = rows
        .iter()
        .map(|row| row.iter().map(String::as_str).collect())
        .collect();

    let mut sheet: Vec<&[&str]> = vec![&STUDENT_HEADER[..]];
    sheet.extend(cells.iter().map(Vec::as_slice));
    xlsx_bytes(&sheet)
}

/// Data rows of a sheet as owned cell vectors
pub fn data_rows(sheet: &Sheet) -> Vec<Vec<String>> {
    sheet.data_rows().map(|(_, r)| r.to_vec()).collect()
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub jobs: Arc<MemoryJobStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub queue: Arc<MemoryQueue>,
    pub records: Arc<MemoryRecords>,
    pub scratch: tempfile::TempDir,
}

impl Harness {
    pub fn new(records: MemoryRecords) -> Self {
        Self {
            jobs: Arc::new(MemoryJobStore::default()),
            blobs: Arc::new(MemoryBlobStore::default()),
            queue: Arc::new(MemoryQueue::default()),
            records: Arc::new(records),
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    pub fn bulk_config(&self, policy: RowFailurePolicy) -> BulkConfig {
        BulkConfig {
            scratch_dir: self.scratch.path().to_path_buf(),
            row_failure_policy: policy,
            ..BulkConfig::default()
        }
    }

    pub fn pipeline(&self, policy: RowFailurePolicy) -> Pipeline {
        self.pipeline_with(self.bulk_config(policy))
    }

    pub fn pipeline_with(&self, config: BulkConfig) -> Pipeline {
        let writer = BulkWriter::new(self.records.clone(), self.records.clone(), self.records.clone());
        Pipeline::new(self.jobs.clone(), self.blobs.clone(), writer, config)
    }

    pub fn feature_state(&self) -> FeatureState {
        FeatureState {
            jobs: self.jobs.clone(),
            blobs: self.blobs.clone(),
            queue: self.queue.clone(),
            bulk: self.bulk_config(RowFailurePolicy::Skip),
        }
    }

    /// Store `bytes` as an upload and create its PENDING job
    pub async fn seed_job(&self, kind: JobKind, file_name: &str, bytes: Vec<u8>) -> Job {
        let request_id = Uuid::new_v4();
        let source_key = upload_key(request_id, file_name);
        self.blobs.insert(&source_key, bytes);
        self.jobs
            .create(NewJob {
                request_id,
                request_type: kind,
                file_name: file_name.to_string(),
                source_key,
            })
            .await
            .unwrap()
    }
}
