use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::error::{BrokerError, Result};
use crate::pipeline::StepId;

/// One step of one operation waiting to run
///
/// The job carries the whole pipeline so the worker that finishes step `index`
/// can enqueue `index + 1` without looking anything up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepJob {
    pub operation_id: i64,
    pub pipeline: Vec<StepId>,
    pub index: usize,
    /// 0 for the initial attempt
    pub attempt: u32,
}

impl StepJob {
    pub fn first(operation_id: i64, pipeline: Vec<StepId>) -> Self {
        Self {
            operation_id,
            pipeline,
            index: 0,
            attempt: 0,
        }
    }

    pub fn step(&self) -> Result<StepId> {
        self.pipeline.get(self.index).copied().ok_or_else(|| {
            BrokerError::Queue(format!(
                "job for operation {} points past the end of its pipeline",
                self.operation_id
            ))
        })
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.pipeline.len()
    }

    /// The following step, first attempt
    pub fn next(&self) -> Option<Self> {
        (!self.is_last()).then(|| Self {
            operation_id: self.operation_id,
            pipeline: self.pipeline.clone(),
            index: self.index + 1,
            attempt: 0,
        })
    }

    /// The same step, next attempt
    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// A job handed to a worker, to be acknowledged once handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: i64,
    pub job: StepJob,
}

/// Durable at-least-once queue of step jobs
///
/// A read job stays invisible for the visibility timeout; if it is not
/// deleted by then it is handed out again.
#[async_trait]
pub trait TaskQueue: Send + Sync + std::fmt::Debug {
    async fn send(&self, job: &StepJob, delay: Duration) -> Result<i64>;

    /// Next job whose delay has elapsed, if any
    async fn read(&self, visibility_timeout: Duration) -> Result<Option<QueuedJob>>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Jobs not yet deleted, including delayed and in-flight ones
    async fn len(&self) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    job: StepJob,
    run_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

/// In-process queue with the same visibility semantics as [`PgQueue`]
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

#[derive(Debug, Default)]
struct MemoryQueueState {
    next_id: i64,
    entries: BTreeMap<i64, MemoryEntry>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs currently waiting, in id order
    pub fn pending(&self) -> Vec<StepJob> {
        self.state
            .lock()
            .entries
            .values()
            .map(|entry| entry.job.clone())
            .collect()
    }
}

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero())
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn send(&self, job: &StepJob, delay: Duration) -> Result<i64> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.entries.insert(
            id,
            MemoryEntry {
                job: job.clone(),
                run_at: after(delay),
                locked_until: None,
            },
        );
        Ok(id)
    }

    async fn read(&self, visibility_timeout: Duration) -> Result<Option<QueuedJob>> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let ready = state
            .entries
            .iter_mut()
            .filter(|(_, entry)| {
                entry.run_at <= now && entry.locked_until.map_or(true, |until| until < now)
            })
            .min_by_key(|(id, entry)| (entry.run_at, **id));

        Ok(ready.map(|(id, entry)| {
            entry.locked_until = Some(after(visibility_timeout));
            QueuedJob {
                id: *id,
                job: entry.job.clone(),
            }
        }))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.state.lock().entries.remove(&id);
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().entries.len())
    }
}

/// Postgres-backed queue over the `broker_jobs` table
#[derive(Debug, Clone)]
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgQueue {
    async fn send(&self, job: &StepJob, delay: Duration) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO broker_jobs (payload, run_at, created_at)
            VALUES ($1, NOW() + make_interval(secs => $2), NOW())
            RETURNING id
            "#,
        )
        .bind(Json(job))
        .bind(delay.as_secs_f64())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            job_id = id,
            operation_id = job.operation_id,
            index = job.index,
            attempt = job.attempt,
            "Job sent"
        );
        Ok(id)
    }

    async fn read(&self, visibility_timeout: Duration) -> Result<Option<QueuedJob>> {
        let row: Option<(i64, Json<StepJob>)> = sqlx::query_as(
            r#"
            UPDATE broker_jobs
            SET locked_until = NOW() + make_interval(secs => $1)
            WHERE id = (
                SELECT id FROM broker_jobs
                WHERE run_at <= NOW()
                  AND (locked_until IS NULL OR locked_until < NOW())
                ORDER BY run_at, id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload
            "#,
        )
        .bind(visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, Json(job))| QueuedJob { id, job }))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM broker_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM broker_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }
}
