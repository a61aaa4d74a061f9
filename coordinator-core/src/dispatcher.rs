//! `SettlementDispatcher`: serializes escrow/identity side effects per task
//! and implements retry/compensation and activity logging.
//!
//! Built around a queue of `(taskId, Action)` items rather than direct
//! calls from the task manager, so that a crash between the state
//! transition and the side effect does not lose work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use marketplace_core::{
    activity_labels, state_machine, Activity, Agent, CoreResult, Event, SYSTEM_ACTOR,
};
use rand::Rng;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::escrow::EscrowAdapter;
use crate::identity::{attribute_keys, IdentityAdapter, NodeRef};
use crate::store::Store;

#[derive(Debug, Clone)]
pub enum Action {
    Settle { task_id: Uuid, worker_id: String },
    Refund { task_id: Uuid },
    UpdateReputation { worker_id: String, success: bool },
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// `MAX_CONCURRENT_SETTLEMENTS` (default 8).
    pub max_concurrent_settlements: usize,
    /// `ESCROW_RETRY_MAX` (default 5).
    pub escrow_retry_max: u32,
    /// `ESCROW_RETRY_BASE_MS` (default 500).
    pub escrow_retry_base_ms: u64,
    /// Bounded retries for identity updates; failures there are non-fatal
    /// and logged rather than retried indefinitely.
    pub identity_retry_max: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_settlements: 8,
            escrow_retry_max: 5,
            escrow_retry_base_ms: 500,
            identity_retry_max: 3,
        }
    }
}

/// Background worker pool that consumes `Action`s, holding at most one
/// in-flight action per task at a time (per-task mutex) while allowing
/// distinct tasks to proceed in parallel up to `max_concurrent_settlements`.
pub struct SettlementDispatcher {
    store: Arc<dyn Store>,
    escrow: Arc<dyn EscrowAdapter>,
    identity: Arc<dyn IdentityAdapter>,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    task_locks: Arc<tokio::sync::RwLock<HashMap<Uuid, Arc<Mutex<()>>>>>,
    sender: mpsc::Sender<Action>,
}

impl SettlementDispatcher {
    /// Spawns the background consumer loop and returns a handle that can
    /// enqueue actions. `queue_capacity` bounds the normal-operation mpsc
    /// channel; anything dropped on a crash is recovered by `recover`.
    pub fn spawn(
        store: Arc<dyn Store>,
        escrow: Arc<dyn EscrowAdapter>,
        identity: Arc<dyn IdentityAdapter>,
        config: DispatcherConfig,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let dispatcher = Arc::new(Self {
            store,
            escrow,
            identity,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_settlements)),
            task_locks: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            config,
            sender,
        });

        let worker = dispatcher.clone();
        tokio::spawn(async move { worker.run(receiver).await });

        dispatcher
    }

    pub async fn enqueue(&self, action: Action) {
        if self.sender.send(action.clone()).await.is_err() {
            error!(?action, "dispatcher queue closed, action dropped");
        }
    }

    /// Executes one action inline, bypassing the queue - used by the HTTP
    /// refund handler (`POST /tasks/:id/refund` returns its final
    /// status synchronously) while still taking the same per-task lock and
    /// concurrency permit that queued actions use, so it can never race a
    /// queued `Settle` for the same task.
    pub async fn execute_now(&self, action: Action) -> CoreResult<()> {
        self.run_one(action).await
    }

    async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<Action>) {
        while let Some(action) = receiver.recv().await {
            let me = self.clone();
            tokio::spawn(async move {
                if let Err(err) = me.run_one(action.clone()).await {
                    error!(?action, %err, "dispatcher action failed");
                }
            });
        }
    }

    async fn task_lock(&self, task_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(lock) = self.task_locks.read().await.get(&task_id) {
            return lock.clone();
        }
        let mut locks = self.task_locks.write().await;
        locks
            .entry(task_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn run_one(&self, action: Action) -> CoreResult<()> {
        match &action {
            Action::Settle { task_id, .. } | Action::Refund { task_id } => {
                let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
                let lock = self.task_lock(*task_id).await;
                let _guard = lock.lock().await;
                match action {
                    Action::Settle { task_id, worker_id } => self.settle(task_id, worker_id).await,
                    Action::Refund { task_id } => self.refund(task_id).await,
                    Action::UpdateReputation { .. } => unreachable!(),
                }
            }
            Action::UpdateReputation { worker_id, success } => {
                self.update_reputation(worker_id.clone(), *success).await
            }
        }
    }

    /// `Settle` algorithm.
    async fn settle(&self, task_id: Uuid, worker_id: String) -> CoreResult<()> {
        let worker_handle = self.resolve_worker_handle(task_id).await?;
        let agent = self.store.get_agent_by_handle(&worker_handle).await?;

        let release = self
            .retry_escrow(self.config.escrow_retry_max, self.config.escrow_retry_base_ms, || {
                let escrow = self.escrow.clone();
                let wallet = agent.wallet.clone();
                Box::pin(async move { escrow.release(task_id, &wallet).await })
            })
            .await;

        match release {
            Ok(receipt) => {
                let task = self
                    .store
                    .update_task_transactional(
                        task_id,
                        Box::new(move |t| {
                            let (mut next, _fx) = state_machine::apply(t, Event::SettlementSucceeded)?;
                            next.settlement_reference = Some(receipt.clone());
                            Ok(next)
                        }),
                    )
                    .await?;

                self.append_activity(task_id, activity_labels::PAYMENT_SETTLED).await?;
                info!(%task_id, %worker_id, handle = %worker_handle, "settlement succeeded");
                self.enqueue(Action::UpdateReputation {
                    worker_id: worker_handle,
                    success: true,
                })
                .await;
                let _ = task;
                Ok(())
            }
            Err(err) => {
                warn!(%task_id, %worker_id, %err, "settlement failed after retries");
                self.store
                    .update_task_transactional(
                        task_id,
                        Box::new(|t| state_machine::apply(t, Event::SettlementFailed).map(|(t, _)| t)),
                    )
                    .await?;
                self.append_activity(task_id, activity_labels::SETTLEMENT_FAILED).await?;
                Ok(())
            }
        }
    }

    /// Resolves the worker handle to credit for a task's settlement from its
    /// accepted bid. The `workerId` a client sends to `POST /tasks/:id/work`
    /// is a free-form identifier distinct from `Bid.worker_handle`, so it
    /// can never be treated as an `Agent` handle directly.
    async fn resolve_worker_handle(&self, task_id: Uuid) -> CoreResult<String> {
        let posting = self.store.get_posting_by_task(task_id).await?;
        let bids = self.store.list_bids_by_job(posting.id).await?;
        bids.into_iter()
            .find(|bid| bid.accepted)
            .map(|bid| bid.worker_handle)
            .ok_or_else(|| marketplace_core::CoreError::not_found(format!("accepted bid for task {task_id}")))
    }

    /// "`Refund` is symmetric, emitting `RefundRequested` upon success."
    async fn refund(&self, task_id: Uuid) -> CoreResult<()> {
        let task = self.store.get_task(task_id).await?;
        let creator = task.creator_wallet.clone();

        let receipt = self
            .retry_escrow(self.config.escrow_retry_max, self.config.escrow_retry_base_ms, || {
                let escrow = self.escrow.clone();
                Box::pin(async move { escrow.refund(task_id).await })
            })
            .await?;

        self.store
            .update_task_transactional(
                task_id,
                Box::new(move |t| {
                    let (mut next, _fx) = state_machine::apply(
                        t,
                        Event::RefundRequested {
                            caller_wallet: creator.clone(),
                        },
                    )?;
                    next.settlement_reference = Some(receipt.clone());
                    Ok(next)
                }),
            )
            .await?;

        self.append_activity(task_id, activity_labels::REFUND_PROCESSED).await?;
        info!(%task_id, "refund succeeded");
        Ok(())
    }

    /// `UpdateReputation`: Δ = +2 success / −5 failure, clamped to
    /// [0,100]; identity-side failure is logged and bounded-retried, never
    /// fatal to the reputation write itself.
    async fn update_reputation(&self, worker_id: String, success: bool) -> CoreResult<()> {
        let delta = if success { 2 } else { -5 };
        let agent = self
            .store
            .update_agent(
                self.store.get_agent_by_handle(&worker_id).await?.id,
                Box::new(move |agent: &mut Agent| {
                    agent.reputation = Agent::clamp_reputation(agent.reputation + delta);
                    if success {
                        agent.tasks_completed += 1;
                    } else {
                        agent.tasks_failed += 1;
                    }
                }),
            )
            .await?;

        let node = NodeRef(format!("sim-node-{}", marketplace_core::wallet::canonicalize(&agent.handle)));
        let attrs = HashMap::from([
            (attribute_keys::REPUTATION.to_string(), agent.reputation.to_string()),
            (attribute_keys::TASKS_COMPLETED.to_string(), agent.tasks_completed.to_string()),
            (attribute_keys::TASKS_FAILED.to_string(), agent.tasks_failed.to_string()),
        ]);

        let mut attempt = 0;
        loop {
            match self.identity.update_attributes(&node, attrs.clone()).await {
                Ok(()) => break,
                Err(err) if attempt < self.config.identity_retry_max => {
                    attempt += 1;
                    warn!(handle = %agent.handle, %err, attempt, "identity update failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(err) => {
                    warn!(handle = %agent.handle, %err, "identity update exhausted retries, not fatal");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn append_activity(&self, task_id: Uuid, label: &str) -> CoreResult<()> {
        self.store
            .append_activity(Activity::new(SYSTEM_ACTOR.to_string(), task_id, label))
            .await?;
        Ok(())
    }

    /// Exponential backoff with jitter over `max_attempts`, retrying only
    /// `BackendUnavailable`/timeout faults.
    async fn retry_escrow<F, Fut, T>(&self, max_attempts: u32, base_ms: u64, mut call: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, crate::error::EngineError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    attempt += 1;
                    let backoff = base_ms.saturating_mul(1u64 << attempt.min(16));
                    let jitter = rand::thread_rng().gen_range(0..=backoff / 4 + 1);
                    warn!(attempt, %err, "escrow call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// restart recovery: scans tasks in `settlement` status (awaiting
    /// `Settle`) and re-enqueues the appropriate action so nothing a crash
    /// interrupted is stranded.
    pub async fn recover(self: &Arc<Self>, tasks: Vec<marketplace_core::Task>) {
        for task in tasks {
            if task.status == marketplace_core::TaskStatus::Settlement {
                if let Some(worker_id) = task.assigned_agents.last().cloned() {
                    info!(task_id = %task.id, "recovering stranded settlement");
                    self.enqueue(Action::Settle {
                        task_id: task.id,
                        worker_id,
                    })
                    .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::SimulatedEscrowAdapter;
    use crate::identity::SimulatedIdentityAdapter;
    use crate::store::InMemoryStore;
    use marketplace_core::{state_machine, Bid, JobPosting, Task};
    use std::collections::HashMap as Map;

    async fn settle_fixture() -> (Arc<InMemoryStore>, Arc<SettlementDispatcher>, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let escrow = Arc::new(SimulatedEscrowAdapter::new());
        let identity = Arc::new(SimulatedIdentityAdapter::new());

        let agent = store
            .upsert_agent("worker-1".into(), "0xWORKER".into(), "worker".into(), vec![], 0)
            .await
            .unwrap();
        identity.register(&agent.handle, &agent.wallet, Map::new()).await.unwrap();

        let task = Task::new("t".into(), None, 100, "0xAAA".into(), vec![]);
        escrow.deposit(task.id, 100, "0xAAA").await.unwrap();
        let task = store.create_task(task).await.unwrap();

        let posting = store.create_posting(JobPosting::new(&task)).await.unwrap();
        let bid = store
            .append_bid(Bid::new(posting.id, "worker-1".into(), "worker-1".into(), "msg".into(), 10, "1h".into(), 100))
            .await
            .unwrap();
        store.mark_bid_accepted(bid.id).await.unwrap();

        let task = store
            .update_task_transactional(task.id, Box::new(|t| state_machine::apply(t, Event::DepositConfirmed).map(|(t, _)| t)))
            .await
            .unwrap();
        let task = store
            .update_task_transactional(
                task.id,
                Box::new(move |t| {
                    state_machine::apply(
                        t,
                        Event::AcceptBid {
                            bid_id: Uuid::new_v4(),
                            worker_id: "worker-1".into(),
                        },
                    )
                    .map(|(t, _)| t)
                }),
            )
            .await
            .unwrap();
        let task = store
            .update_task_transactional(
                task.id,
                Box::new(|t| {
                    state_machine::apply(
                        t,
                        Event::SubmitWork {
                            worker_id: "worker-1".into(),
                            result: serde_json::json!({}),
                        },
                    )
                    .map(|(t, _)| t)
                }),
            )
            .await
            .unwrap();

        let dispatcher = SettlementDispatcher::spawn(
            store.clone(),
            escrow,
            identity,
            DispatcherConfig::default(),
            16,
        );
        (store, dispatcher, task.id)
    }

    #[tokio::test]
    async fn settle_transitions_task_to_completed() {
        let (store, dispatcher, task_id) = settle_fixture().await;
        dispatcher
            .execute_now(Action::Settle {
                task_id,
                worker_id: "worker-1".into(),
            })
            .await
            .unwrap();

        let task = store.get_task(task_id).await.unwrap();
        assert_eq!(task.status, marketplace_core::TaskStatus::Completed);
        assert_eq!(task.escrow_status, marketplace_core::EscrowStatus::Released);
    }

    #[tokio::test]
    async fn reputation_increments_on_success() {
        let (store, dispatcher, task_id) = settle_fixture().await;
        dispatcher
            .execute_now(Action::Settle {
                task_id,
                worker_id: "worker-1".into(),
            })
            .await
            .unwrap();
        // settle() enqueues UpdateReputation onto the background queue; give it
        // a moment to drain rather than re-running it inline (which would
        // double-apply the delta).
        tokio::time::sleep(Duration::from_millis(50)).await;

        let agent = store.get_agent_by_handle("worker-1").await.unwrap();
        assert_eq!(agent.reputation, 52);
        assert_eq!(agent.tasks_completed, 1);
    }
}
