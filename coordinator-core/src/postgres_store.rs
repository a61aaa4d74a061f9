//! A durable `Store` backed by Postgres, behind the `postgres` feature.
//!
//! Each entity maps to one table holding its id, the columns the
//! store's query surface needs (creator wallet, job id, ...), and the full
//! record as `JSONB` so the row shape tracks `marketplace-core`'s structs
//! without a parallel SQL schema to keep in sync by hand.

use async_trait::async_trait;
use marketplace_core::{Activity, Agent, Bid, CoreError, CoreResult, JobPosting, PostingStatus, Task};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::Store;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> CoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::backend_unavailable(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    /// Creates the tables this store needs if they don't already exist.
    /// Migration management beyond this belongs to an operator-run
    /// migration tool, not this crate.
    pub async fn migrate(&self) -> CoreResult<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS agents (id UUID PRIMARY KEY, handle TEXT UNIQUE NOT NULL, data JSONB NOT NULL)",
            "CREATE TABLE IF NOT EXISTS tasks (id UUID PRIMARY KEY, creator_wallet TEXT NOT NULL, data JSONB NOT NULL)",
            "CREATE TABLE IF NOT EXISTS postings (id UUID PRIMARY KEY, task_id UUID UNIQUE NOT NULL, data JSONB NOT NULL)",
            "CREATE TABLE IF NOT EXISTS bids (id UUID PRIMARY KEY, job_id UUID NOT NULL, data JSONB NOT NULL)",
            "CREATE TABLE IF NOT EXISTS activity (id UUID PRIMARY KEY, task_id UUID NOT NULL, ts TIMESTAMPTZ NOT NULL, data JSONB NOT NULL)",
            "CREATE INDEX IF NOT EXISTS bids_job_id_idx ON bids (job_id)",
            "CREATE INDEX IF NOT EXISTS activity_task_id_idx ON activity (task_id)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::backend_unavailable(format!("migration failed: {e}")))?;
        }
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::backend_unavailable(format!("postgres error: {e}"))
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> CoreResult<T> {
    serde_json::from_value(value).map_err(|e| CoreError::internal(format!("row decode failed: {e}")))
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_agent(
        &self,
        handle: String,
        wallet: String,
        role: String,
        skills: Vec<String>,
        max_liability: i64,
    ) -> CoreResult<Agent> {
        if let Ok(existing) = self.get_agent_by_handle(&handle).await {
            return Ok(existing);
        }
        let agent = Agent::new(handle, wallet, role, skills, max_liability);
        let data = serde_json::to_value(&agent).map_err(|e| CoreError::internal(e.to_string()))?;
        sqlx::query("INSERT INTO agents (id, handle, data) VALUES ($1, $2, $3)")
            .bind(agent.id)
            .bind(&agent.handle)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(agent)
    }

    async fn get_agent(&self, id: Uuid) -> CoreResult<Agent> {
        let row = sqlx::query("SELECT data FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found(format!("agent {id}")))?;
        decode(row.get("data"))
    }

    async fn get_agent_by_handle(&self, handle: &str) -> CoreResult<Agent> {
        let row = sqlx::query("SELECT data FROM agents WHERE handle = $1")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found(format!("agent handle {handle}")))?;
        decode(row.get("data"))
    }

    async fn list_agents(&self) -> CoreResult<Vec<Agent>> {
        let rows = sqlx::query("SELECT data FROM agents")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn update_agent(&self, id: Uuid, f: Box<dyn FnOnce(&mut Agent) + Send>) -> CoreResult<Agent> {
        let mut agent = self.get_agent(id).await?;
        f(&mut agent);
        agent.updated_at = chrono::Utc::now();
        let data = serde_json::to_value(&agent).map_err(|e| CoreError::internal(e.to_string()))?;
        sqlx::query("UPDATE agents SET data = $2 WHERE id = $1")
            .bind(id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(agent)
    }

    async fn create_task(&self, task: Task) -> CoreResult<Task> {
        let data = serde_json::to_value(&task).map_err(|e| CoreError::internal(e.to_string()))?;
        sqlx::query("INSERT INTO tasks (id, creator_wallet, data) VALUES ($1, $2, $3)")
            .bind(task.id)
            .bind(&task.creator_wallet)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> CoreResult<Task> {
        let row = sqlx::query("SELECT data FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found(format!("task {id}")))?;
        decode(row.get("data"))
    }

    async fn list_tasks_by_creator(&self, wallet: &str) -> CoreResult<Vec<Task>> {
        let rows = sqlx::query("SELECT data FROM tasks WHERE lower(creator_wallet) = lower($1)")
            .bind(wallet)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn list_tasks_needing_recovery(&self) -> CoreResult<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT data FROM tasks WHERE data->>'status' = 'settlement' OR data->>'escrow_status' = 'pending'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn update_task_transactional(
        &self,
        id: Uuid,
        f: Box<dyn FnOnce(&Task) -> CoreResult<Task> + Send>,
    ) -> CoreResult<Task> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query("SELECT data FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found(format!("task {id}")))?;
        let current: Task = decode(row.get("data"))?;

        let next = f(&current)?;
        let data = serde_json::to_value(&next).map_err(|e| CoreError::internal(e.to_string()))?;
        sqlx::query("UPDATE tasks SET data = $2 WHERE id = $1")
            .bind(id)
            .bind(&data)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(next)
    }

    async fn create_posting(&self, posting: JobPosting) -> CoreResult<JobPosting> {
        let data = serde_json::to_value(&posting).map_err(|e| CoreError::internal(e.to_string()))?;
        sqlx::query("INSERT INTO postings (id, task_id, data) VALUES ($1, $2, $3)")
            .bind(posting.id)
            .bind(posting.task_id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(posting)
    }

    async fn get_posting(&self, id: Uuid) -> CoreResult<JobPosting> {
        let row = sqlx::query("SELECT data FROM postings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found(format!("posting {id}")))?;
        decode(row.get("data"))
    }

    async fn get_posting_by_task(&self, task_id: Uuid) -> CoreResult<JobPosting> {
        let row = sqlx::query("SELECT data FROM postings WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found(format!("posting for task {task_id}")))?;
        decode(row.get("data"))
    }

    async fn list_postings(&self) -> CoreResult<Vec<JobPosting>> {
        let rows = sqlx::query("SELECT data FROM postings")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn update_posting_status(&self, id: Uuid, status: PostingStatus) -> CoreResult<JobPosting> {
        let mut posting = self.get_posting(id).await?;
        posting.status = status;
        let data = serde_json::to_value(&posting).map_err(|e| CoreError::internal(e.to_string()))?;
        sqlx::query("UPDATE postings SET data = $2 WHERE id = $1")
            .bind(id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(posting)
    }

    async fn append_bid(&self, bid: Bid) -> CoreResult<Bid> {
        let data = serde_json::to_value(&bid).map_err(|e| CoreError::internal(e.to_string()))?;
        sqlx::query("INSERT INTO bids (id, job_id, data) VALUES ($1, $2, $3)")
            .bind(bid.id)
            .bind(bid.job_id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(bid)
    }

    async fn list_bids_by_job(&self, job_id: Uuid) -> CoreResult<Vec<Bid>> {
        let rows = sqlx::query("SELECT data FROM bids WHERE job_id = $1")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn get_bid(&self, id: Uuid) -> CoreResult<Bid> {
        let row = sqlx::query("SELECT data FROM bids WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found(format!("bid {id}")))?;
        decode(row.get("data"))
    }

    async fn mark_bid_accepted(&self, id: Uuid) -> CoreResult<Bid> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query("SELECT job_id FROM bids WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found(format!("bid {id}")))?;
        let job_id: Uuid = row.get("job_id");

        let already: Vec<serde_json::Value> = sqlx::query("SELECT data FROM bids WHERE job_id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(|r| r.get("data"))
            .collect();
        let any_accepted = already
            .iter()
            .any(|v| v.get("accepted").and_then(|a| a.as_bool()).unwrap_or(false));
        if any_accepted {
            return Err(CoreError::conflict("a bid on this job is already accepted"));
        }

        let row = sqlx::query("SELECT data FROM bids WHERE id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let mut bid: Bid = decode(row.get("data"))?;
        bid.accepted = true;
        let data = serde_json::to_value(&bid).map_err(|e| CoreError::internal(e.to_string()))?;
        sqlx::query("UPDATE bids SET data = $2 WHERE id = $1")
            .bind(id)
            .bind(&data)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(bid)
    }

    async fn append_activity(&self, entry: Activity) -> CoreResult<Activity> {
        let data = serde_json::to_value(&entry).map_err(|e| CoreError::internal(e.to_string()))?;
        sqlx::query("INSERT INTO activity (id, task_id, ts, data) VALUES ($1, $2, $3, $4)")
            .bind(entry.id)
            .bind(entry.task_id)
            .bind(entry.timestamp)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(entry)
    }

    async fn list_activity_by_tasks(&self, task_ids: &[Uuid], limit: usize) -> CoreResult<Vec<Activity>> {
        let rows = sqlx::query("SELECT data FROM activity WHERE task_id = ANY($1) ORDER BY ts DESC LIMIT $2")
            .bind(task_ids)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }
}

/// Only used by `health_check` to confirm the pool accepts a trivial query;
/// kept here rather than in `coordinator.rs` since only this module knows
/// about `sqlx::PgPool`.
impl PostgresStore {
    pub async fn ping(&self) -> CoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }
}

