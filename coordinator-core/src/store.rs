//! The durable repository for Agent, Task, JobPosting, Bid, and Activity
//! records.
//!
//! `Store` is a trait so a real database-backed implementation can be
//! substituted without touching the coordinator; `InMemoryStore` is the
//! reference implementation, an `Arc<RwLock<HashMap<...>>>` per entity with
//! per-task serialization folded into `update_task_transactional`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use marketplace_core::{Activity, Agent, Bid, CoreError, CoreResult, JobPosting, Task};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Everything the coordinator needs from a durable repository.
///
/// Methods return `marketplace_core::CoreResult` directly: a store fault
/// that escapes a real backend is exactly a `BackendUnavailable` or
/// `NotFound` in the taxonomy, there's no separate store-private error
/// type to convert.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_agent(
        &self,
        handle: String,
        wallet: String,
        role: String,
        skills: Vec<String>,
        max_liability: i64,
    ) -> CoreResult<Agent>;
    async fn get_agent(&self, id: Uuid) -> CoreResult<Agent>;
    async fn get_agent_by_handle(&self, handle: &str) -> CoreResult<Agent>;
    async fn list_agents(&self) -> CoreResult<Vec<Agent>>;
    async fn update_agent(&self, id: Uuid, f: Box<dyn FnOnce(&mut Agent) + Send>) -> CoreResult<Agent>;

    async fn create_task(&self, task: Task) -> CoreResult<Task>;
    async fn get_task(&self, id: Uuid) -> CoreResult<Task>;
    async fn list_tasks_by_creator(&self, wallet: &str) -> CoreResult<Vec<Task>>;
    /// Tasks a restart-recovery scan must re-enqueue: stuck mid-settlement
    /// or still awaiting a deposit confirmation.
    async fn list_tasks_needing_recovery(&self) -> CoreResult<Vec<Task>>;
    /// Read-modify-write a single task under its per-task lock. `f` returns
    /// the new task state plus any side effects; a store implementation
    /// only needs to guarantee the read-then-write is atomic with respect
    /// to other callers of this method for the same `id`.
    async fn update_task_transactional(
        &self,
        id: Uuid,
        f: Box<dyn FnOnce(&Task) -> CoreResult<Task> + Send>,
    ) -> CoreResult<Task>;

    async fn create_posting(&self, posting: JobPosting) -> CoreResult<JobPosting>;
    async fn get_posting(&self, id: Uuid) -> CoreResult<JobPosting>;
    async fn get_posting_by_task(&self, task_id: Uuid) -> CoreResult<JobPosting>;
    async fn list_postings(&self) -> CoreResult<Vec<JobPosting>>;
    async fn update_posting_status(&self, id: Uuid, status: marketplace_core::PostingStatus) -> CoreResult<JobPosting>;

    async fn append_bid(&self, bid: Bid) -> CoreResult<Bid>;
    async fn list_bids_by_job(&self, job_id: Uuid) -> CoreResult<Vec<Bid>>;
    async fn get_bid(&self, id: Uuid) -> CoreResult<Bid>;
    /// Fails with `Conflict` if any other bid on the same `jobId` is
    /// already accepted.
    async fn mark_bid_accepted(&self, id: Uuid) -> CoreResult<Bid>;

    async fn append_activity(&self, entry: Activity) -> CoreResult<Activity>;
    async fn list_activity_by_tasks(&self, task_ids: &[Uuid], limit: usize) -> CoreResult<Vec<Activity>>;
}

#[derive(Default)]
struct Tables {
    agents: HashMap<Uuid, Agent>,
    agents_by_handle: HashMap<String, Uuid>,
    tasks: HashMap<Uuid, Task>,
    postings: HashMap<Uuid, JobPosting>,
    postings_by_task: HashMap<Uuid, Uuid>,
    bids: HashMap<Uuid, Bid>,
    bids_by_job: HashMap<Uuid, Vec<Uuid>>,
    activity: Vec<Activity>,
}

/// In-process store backed by keyed mutex maps. Per-task serialization is
/// implemented with a secondary map of task-id -> `tokio::sync::Mutex<()>`,
/// so `update_task_transactional` holds a real lock across its read and
/// write instead of racing on the outer `RwLock`.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    task_locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            task_locks: RwLock::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, task_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(lock) = self.task_locks.read().await.get(&task_id) {
            return lock.clone();
        }
        let mut locks = self.task_locks.write().await;
        locks
            .entry(task_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_agent(
        &self,
        handle: String,
        wallet: String,
        role: String,
        skills: Vec<String>,
        max_liability: i64,
    ) -> CoreResult<Agent> {
        let key = marketplace_core::wallet::canonicalize(&handle);
        let mut tables = self.tables.write().await;
        if let Some(&id) = tables.agents_by_handle.get(&key) {
            let agent = tables.agents.get(&id).cloned().expect("handle index out of sync");
            return Ok(agent);
        }
        let agent = Agent::new(handle, wallet, role, skills, max_liability);
        tables.agents_by_handle.insert(key, agent.id);
        tables.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, id: Uuid) -> CoreResult<Agent> {
        self.tables
            .read()
            .await
            .agents
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("agent {id}")))
    }

    async fn get_agent_by_handle(&self, handle: &str) -> CoreResult<Agent> {
        let key = marketplace_core::wallet::canonicalize(handle);
        let tables = self.tables.read().await;
        let id = tables
            .agents_by_handle
            .get(&key)
            .ok_or_else(|| CoreError::not_found(format!("agent handle {handle}")))?;
        Ok(tables.agents.get(id).cloned().expect("handle index out of sync"))
    }

    async fn list_agents(&self) -> CoreResult<Vec<Agent>> {
        Ok(self.tables.read().await.agents.values().cloned().collect())
    }

    async fn update_agent(&self, id: Uuid, f: Box<dyn FnOnce(&mut Agent) + Send>) -> CoreResult<Agent> {
        let mut tables = self.tables.write().await;
        let agent = tables
            .agents
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("agent {id}")))?;
        f(agent);
        agent.updated_at = chrono::Utc::now();
        Ok(agent.clone())
    }

    async fn create_task(&self, task: Task) -> CoreResult<Task> {
        let mut tables = self.tables.write().await;
        tables.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> CoreResult<Task> {
        self.tables
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("task {id}")))
    }

    async fn list_tasks_by_creator(&self, wallet: &str) -> CoreResult<Vec<Task>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| marketplace_core::wallet::wallets_equal(&t.creator_wallet, wallet))
            .cloned()
            .collect())
    }

    async fn list_tasks_needing_recovery(&self) -> CoreResult<Vec<Task>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| {
                t.status == marketplace_core::TaskStatus::Settlement
                    || t.escrow_status == marketplace_core::EscrowStatus::Pending
            })
            .cloned()
            .collect())
    }

    async fn update_task_transactional(
        &self,
        id: Uuid,
        f: Box<dyn FnOnce(&Task) -> CoreResult<Task> + Send>,
    ) -> CoreResult<Task> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let current = self.get_task(id).await?;
        let next = f(&current)?;

        let mut tables = self.tables.write().await;
        tables.tasks.insert(id, next.clone());
        Ok(next)
    }

    async fn create_posting(&self, posting: JobPosting) -> CoreResult<JobPosting> {
        let mut tables = self.tables.write().await;
        tables.postings_by_task.insert(posting.task_id, posting.id);
        tables.postings.insert(posting.id, posting.clone());
        Ok(posting)
    }

    async fn get_posting(&self, id: Uuid) -> CoreResult<JobPosting> {
        self.tables
            .read()
            .await
            .postings
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("posting {id}")))
    }

    async fn get_posting_by_task(&self, task_id: Uuid) -> CoreResult<JobPosting> {
        let tables = self.tables.read().await;
        let id = tables
            .postings_by_task
            .get(&task_id)
            .ok_or_else(|| CoreError::not_found(format!("posting for task {task_id}")))?;
        Ok(tables.postings.get(id).cloned().expect("posting index out of sync"))
    }

    async fn list_postings(&self) -> CoreResult<Vec<JobPosting>> {
        Ok(self.tables.read().await.postings.values().cloned().collect())
    }

    async fn update_posting_status(&self, id: Uuid, status: marketplace_core::PostingStatus) -> CoreResult<JobPosting> {
        let mut tables = self.tables.write().await;
        let posting = tables
            .postings
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("posting {id}")))?;
        posting.status = status;
        Ok(posting.clone())
    }

    async fn append_bid(&self, bid: Bid) -> CoreResult<Bid> {
        let mut tables = self.tables.write().await;
        tables.bids_by_job.entry(bid.job_id).or_default().push(bid.id);
        tables.bids.insert(bid.id, bid.clone());
        Ok(bid)
    }

    async fn list_bids_by_job(&self, job_id: Uuid) -> CoreResult<Vec<Bid>> {
        let tables = self.tables.read().await;
        Ok(tables
            .bids_by_job
            .get(&job_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.bids.get(id).cloned())
            .collect())
    }

    async fn get_bid(&self, id: Uuid) -> CoreResult<Bid> {
        self.tables
            .read()
            .await
            .bids
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("bid {id}")))
    }

    async fn mark_bid_accepted(&self, id: Uuid) -> CoreResult<Bid> {
        let mut tables = self.tables.write().await;
        let job_id = tables
            .bids
            .get(&id)
            .ok_or_else(|| CoreError::not_found(format!("bid {id}")))?
            .job_id;

        let already_accepted = tables
            .bids_by_job
            .get(&job_id)
            .into_iter()
            .flatten()
            .any(|other| tables.bids.get(other).map(|b| b.accepted).unwrap_or(false));
        if already_accepted {
            return Err(CoreError::conflict("a bid on this job is already accepted"));
        }

        let bid = tables.bids.get_mut(&id).expect("checked above");
        bid.accepted = true;
        Ok(bid.clone())
    }

    async fn append_activity(&self, entry: Activity) -> CoreResult<Activity> {
        let mut tables = self.tables.write().await;
        tables.activity.push(entry.clone());
        Ok(entry)
    }

    async fn list_activity_by_tasks(&self, task_ids: &[Uuid], limit: usize) -> CoreResult<Vec<Activity>> {
        let tables = self.tables.read().await;
        let mut matched: Vec<Activity> = tables
            .activity
            .iter()
            .filter(|a| task_ids.contains(&a.task_id))
            .cloned()
            .collect();
        matched.sort_by_key(|a| std::cmp::Reverse(a.timestamp));
        matched.truncate(limit);
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_core::Task;

    #[tokio::test]
    async fn upsert_agent_is_idempotent_by_handle() {
        let store = InMemoryStore::new();
        let a = store
            .upsert_agent("w1".into(), "0xAAA".into(), "worker".into(), vec![], 0)
            .await
            .unwrap();
        let b = store
            .upsert_agent("w1".into(), "0xZZZ".into(), "worker".into(), vec![], 0)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.wallet, "0xAAA");
    }

    #[tokio::test]
    async fn concurrent_bid_acceptance_only_one_wins() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = Uuid::new_v4();
        let b1 = store
            .append_bid(Bid::new(job_id, "w1".into(), "w1.eth".into(), "msg".into(), 10, "1h".into(), 50))
            .await
            .unwrap();
        let b2 = store
            .append_bid(Bid::new(job_id, "w2".into(), "w2.eth".into(), "msg".into(), 10, "1h".into(), 50))
            .await
            .unwrap();

        let s1 = store.clone();
        let s2 = store.clone();
        let (r1, r2) = tokio::join!(s1.mark_bid_accepted(b1.id), s2.mark_bid_accepted(b2.id));
        assert!(r1.is_ok() ^ r2.is_ok());
    }

    #[tokio::test]
    async fn update_task_transactional_rejects_invalid_transition() {
        let store = InMemoryStore::new();
        let task = Task::new("t".into(), None, 100, "0xAAA".into(), vec![]);
        let task = store.create_task(task).await.unwrap();

        let result = store
            .update_task_transactional(
                task.id,
                Box::new(|t| marketplace_core::state_machine::apply(t, marketplace_core::Event::SettlementSucceeded).map(|(t, _)| t)),
            )
            .await;
        assert!(result.is_err());
    }
}
