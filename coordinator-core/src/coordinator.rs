//! `MarketplaceCoordinator`: the facade the HTTP layer drives.
//!
//! A facade composing the store, adapters, and dispatcher behind a handful
//! of public methods that each perform validation, authorization, a
//! state-machine step, side effect dispatch, and activity logging in one
//! place, so the HTTP handlers stay thin.

use std::collections::HashMap;
use std::sync::Arc;

use marketplace_core::{
    activity_labels, state_machine, wallet, Activity, Agent, Bid, CoreError, CoreResult, Event,
    JobPosting, PostingStatus, Task, SYSTEM_ACTOR,
};
use tracing::info;
use uuid::Uuid;

use crate::dispatcher::{Action, SettlementDispatcher};
use crate::escrow::EscrowAdapter;
use crate::identity::{attribute_keys, IdentityAdapter};
use crate::store::Store;

/// A task as seen by a specific caller: `workResults` are redacted to a
/// boolean for everyone but the creator ("Result visibility").
#[derive(Debug, Clone)]
pub struct TaskView {
    pub task: Task,
    pub has_results: bool,
    pub is_creator: bool,
}

pub struct NodeHealth {
    pub healthy: bool,
    pub components: HashMap<String, String>,
}

pub struct MarketplaceCoordinator {
    store: Arc<dyn Store>,
    escrow: Arc<dyn EscrowAdapter>,
    identity: Arc<dyn IdentityAdapter>,
    dispatcher: Arc<SettlementDispatcher>,
}

impl MarketplaceCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        escrow: Arc<dyn EscrowAdapter>,
        identity: Arc<dyn IdentityAdapter>,
        dispatcher: Arc<SettlementDispatcher>,
    ) -> Self {
        Self {
            store,
            escrow,
            identity,
            dispatcher,
        }
    }

    /// Scans for stranded work on startup and re-enqueues it.
    pub async fn recover_on_startup(&self) -> CoreResult<()> {
        let tasks = self.store.list_tasks_needing_recovery().await?;
        let count = tasks.len();
        self.dispatcher.recover(tasks).await;
        if count > 0 {
            info!(count, "recovered stranded tasks on startup");
        }
        Ok(())
    }

    /// `POST /jobboard`.
    pub async fn create_job(
        &self,
        title: String,
        description: Option<String>,
        budget: i64,
        required_skills: Vec<String>,
        creator_wallet: String,
    ) -> CoreResult<(Task, JobPosting)> {
        let (task, posting, effects) =
            state_machine::create_job(title, description, budget, creator_wallet, required_skills)?;

        let task = self.store.create_task(task).await?;
        let posting = self.store.create_posting(posting).await?;
        self.apply_effects(effects).await?;

        info!(task_id = %task.id, "job created");
        Ok((task, posting))
    }

    /// `POST /jobboard/:id/confirm-escrow` (the verifying path
    /// chosen as primary per DESIGN.md's Open Question resolution).
    pub async fn confirm_escrow(
        &self,
        task_id: Uuid,
        external_ref: String,
        depositor_wallet: String,
    ) -> CoreResult<Task> {
        let task = self.store.get_task(task_id).await?;
        let receipt = self
            .escrow
            .verify_deposit(task_id, &external_ref, &depositor_wallet, task.escrow_amount)
            .await
            .map_err(CoreError::from)?;

        let task = self
            .store
            .update_task_transactional(
                task_id,
                Box::new(move |t| {
                    let (mut next, _fx) = state_machine::apply(t, Event::DepositConfirmed)?;
                    next.settlement_reference = Some(receipt.clone());
                    Ok(next)
                }),
            )
            .await?;

        self.append_activity(task_id, SYSTEM_ACTOR, activity_labels::ESCROW_HELD).await?;
        Ok(task)
    }

    /// `POST /jobboard/:id/bid`.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_bid(
        &self,
        job_id: Uuid,
        worker_id: String,
        worker_handle: String,
        message: String,
        relevance_score: i32,
        estimated_time: String,
        proposed_amount: i64,
    ) -> CoreResult<Bid> {
        self.store.get_posting(job_id).await?;
        if !(0..=100).contains(&relevance_score) {
            return Err(CoreError::validation("relevanceScore must be within 0..=100"));
        }
        let bid = Bid::new(
            job_id,
            worker_id.clone(),
            worker_handle,
            message,
            relevance_score,
            estimated_time,
            proposed_amount,
        );
        let bid = self.store.append_bid(bid).await?;
        let task_id = self.task_id_for_job(job_id).await?;
        self.append_activity(task_id, &worker_id, activity_labels::BID_SUBMITTED).await?;
        Ok(bid)
    }

    /// `POST /jobboard/:id/accept` ("Bid acceptance").
    pub async fn accept_bid(&self, job_id: Uuid, bid_id: Uuid, caller_wallet: String) -> CoreResult<Task> {
        let posting = self.store.get_posting(job_id).await?;
        if !wallet::wallets_equal(&posting.creator_wallet, &caller_wallet) {
            return Err(CoreError::authorization("only the job creator may accept a bid"));
        }

        let bid = self.store.mark_bid_accepted(bid_id).await?;
        let task = self
            .store
            .update_task_transactional(
                posting.task_id,
                Box::new(move |t| {
                    state_machine::apply(
                        t,
                        Event::AcceptBid {
                            bid_id: bid.id,
                            worker_id: bid.worker_id.clone(),
                        },
                    )
                    .map(|(t, _)| t)
                }),
            )
            .await?;

        self.store
            .update_posting_status(job_id, PostingStatus::Assigned)
            .await?;
        self.append_activity(task.id, SYSTEM_ACTOR, activity_labels::BID_ACCEPTED).await?;
        Ok(task)
    }

    /// `POST /tasks/:id/work` returns as soon as the `submission` transition
    /// commits - it does not wait for settlement to finish.
    pub async fn submit_work(&self, task_id: Uuid, worker_id: String, result: serde_json::Value) -> CoreResult<Task> {
        let worker_id_for_effects = worker_id.clone();
        let task = self
            .store
            .update_task_transactional(
                task_id,
                Box::new(move |t| {
                    state_machine::apply(
                        t,
                        Event::SubmitWork {
                            worker_id: worker_id_for_effects.clone(),
                            result: result.clone(),
                        },
                    )
                    .map(|(t, _)| t)
                }),
            )
            .await?;

        self.dispatcher
            .enqueue(Action::Settle {
                task_id,
                worker_id: worker_id.clone(),
            })
            .await;
        self.append_activity(task_id, &worker_id, activity_labels::WORK_SUBMITTED).await?;
        Ok(task)
    }

    /// `POST /tasks/:id/refund` returns the final outcome synchronously,
    /// unlike `submit_work`.
    pub async fn refund(&self, task_id: Uuid, caller_wallet: String) -> CoreResult<Task> {
        let task = self.store.get_task(task_id).await?;
        if !wallet::wallets_equal(&task.creator_wallet, &caller_wallet) {
            return Err(CoreError::authorization("only the task creator may request a refund"));
        }
        if task.escrow_status != marketplace_core::EscrowStatus::Held {
            return Err(CoreError::validation("escrow is not held for this task"));
        }

        self.dispatcher
            .execute_now(Action::Refund { task_id })
            .await
            .map_err(CoreError::from)?;

        self.store.get_task(task_id).await
    }

    /// Admin status override; the only event callers actually send through
    /// this path is `ForceClose`. Does not itself touch agent reputation.
    pub async fn force_status(&self, task_id: Uuid, event: Event, actor_id: Option<String>) -> CoreResult<Task> {
        let task = self
            .store
            .update_task_transactional(task_id, Box::new(move |t| state_machine::apply(t, event.clone()).map(|(t, _)| t)))
            .await?;
        let actor = actor_id.unwrap_or_else(|| SYSTEM_ACTOR.to_string());
        self.append_activity(task_id, &actor, &activity_labels::status_changed_to(task.status.as_str()))
            .await?;
        Ok(task)
    }

    /// `GET /tasks/:id?address=W` ("Result visibility").
    pub async fn get_task_view(&self, task_id: Uuid, caller_wallet: Option<&str>) -> CoreResult<TaskView> {
        let task = self.store.get_task(task_id).await?;
        let is_creator = caller_wallet
            .map(|w| wallet::wallets_equal(w, &task.creator_wallet))
            .unwrap_or(false);
        let has_results = task.has_results();
        Ok(TaskView {
            task,
            has_results,
            is_creator,
        })
    }

    /// `GET /tasks?address=W` ("Listing scope").
    pub async fn list_tasks_for(&self, caller_wallet: &str) -> CoreResult<Vec<Task>> {
        self.store.list_tasks_by_creator(caller_wallet).await
    }

    pub async fn list_postings(&self) -> CoreResult<Vec<JobPosting>> {
        self.store.list_postings().await
    }

    pub async fn get_posting(&self, job_id: Uuid) -> CoreResult<JobPosting> {
        self.store.get_posting(job_id).await
    }

    pub async fn list_bids(&self, job_id: Uuid) -> CoreResult<Vec<Bid>> {
        self.store.list_bids_by_job(job_id).await
    }

    /// `GET /tasks/activity/feed?address=W`, newest 30.
    pub async fn activity_feed(&self, caller_wallet: &str) -> CoreResult<Vec<Activity>> {
        let tasks = self.store.list_tasks_by_creator(caller_wallet).await?;
        let task_ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        self.store.list_activity_by_tasks(&task_ids, 30).await
    }

    /// `POST /agents`: upserts, then registers with the identity adapter
    /// on first insert only.
    pub async fn upsert_agent(
        &self,
        handle: String,
        wallet: String,
        role: String,
        skills: Vec<String>,
        max_liability: i64,
    ) -> CoreResult<Agent> {
        let was_new = self.store.get_agent_by_handle(&handle).await.is_err();
        let agent = self
            .store
            .upsert_agent(handle.clone(), wallet.clone(), role.clone(), skills.clone(), max_liability)
            .await?;

        if was_new {
            let attrs = HashMap::from([
                (attribute_keys::ROLE.to_string(), role),
                (attribute_keys::SKILLS.to_string(), skills.join(",")),
                (attribute_keys::REPUTATION.to_string(), agent.reputation.to_string()),
                (attribute_keys::TASKS_COMPLETED.to_string(), "0".to_string()),
                (attribute_keys::TASKS_FAILED.to_string(), "0".to_string()),
            ]);
            let node = self
                .identity
                .register(&handle, &wallet, attrs)
                .await
                .map_err(CoreError::from)?;
            self.store
                .update_agent(
                    agent.id,
                    Box::new(move |a| {
                        a.identity_registered = true;
                        a.identity_node = Some(node.0);
                    }),
                )
                .await?;
        }

        self.store.get_agent(agent.id).await
    }

    /// `PATCH /agents/:id`.
    pub async fn patch_agent(&self, id: Uuid, patch: AgentPatch) -> CoreResult<Agent> {
        self.store
            .update_agent(
                id,
                Box::new(move |agent| {
                    if let Some(role) = patch.role {
                        agent.role = role;
                    }
                    if let Some(skills) = patch.skills {
                        agent.skills = skills;
                    }
                    if let Some(active) = patch.active {
                        agent.active = active;
                    }
                    if let Some(max_liability) = patch.max_liability {
                        agent.max_liability = max_liability;
                    }
                }),
            )
            .await
    }

    pub async fn list_agents(&self) -> CoreResult<Vec<Agent>> {
        self.store.list_agents().await
    }

    /// `GET /identity/lookup/:handle` (a passthrough).
    pub async fn lookup_identity(&self, handle: &str) -> CoreResult<crate::identity::IdentityRecord> {
        self.identity.lookup(handle).await.map_err(CoreError::from)
    }

    /// `GET /health` ("Health/readiness detail").
    pub async fn health_check(&self) -> NodeHealth {
        let mut components = HashMap::new();
        components.insert(
            "store".to_string(),
            match self.store.list_agents().await {
                Ok(_) => "ok".to_string(),
                Err(e) => e.to_string(),
            },
        );
        components.insert(
            "escrow".to_string(),
            match self.escrow.query(Uuid::nil()).await {
                Ok(_) => "ok".to_string(),
                Err(e) if matches!(e, crate::error::EngineError::NotHeld(_)) => "ok".to_string(),
                Err(e) => e.to_string(),
            },
        );
        components.insert(
            "identity".to_string(),
            match self.identity.lookup("__health_probe__").await {
                Ok(_) => "ok".to_string(),
                Err(e) if matches!(e, crate::error::EngineError::NotRegistered(_)) => "ok".to_string(),
                Err(e) => e.to_string(),
            },
        );
        let healthy = components.values().all(|v| v == "ok");
        NodeHealth { healthy, components }
    }

    async fn task_id_for_job(&self, job_id: Uuid) -> CoreResult<Uuid> {
        Ok(self.store.get_posting(job_id).await?.task_id)
    }

    async fn apply_effects(&self, effects: Vec<marketplace_core::SideEffect>) -> CoreResult<()> {
        for effect in effects {
            match effect {
                marketplace_core::SideEffect::EnqueueSettle { task_id, worker_id } => {
                    self.dispatcher.enqueue(Action::Settle { task_id, worker_id }).await;
                }
                marketplace_core::SideEffect::EnqueueRefund { task_id } => {
                    self.dispatcher.enqueue(Action::Refund { task_id }).await;
                }
                marketplace_core::SideEffect::EnqueueReputationUpdate { worker_id, success } => {
                    self.dispatcher
                        .enqueue(Action::UpdateReputation { worker_id, success })
                        .await;
                }
                marketplace_core::SideEffect::AppendActivity { actor_id, task_id, action } => {
                    self.append_activity(task_id, &actor_id, &action).await?;
                }
            }
        }
        Ok(())
    }

    async fn append_activity(&self, task_id: Uuid, actor_id: &str, label: &str) -> CoreResult<()> {
        self.store
            .append_activity(Activity::new(actor_id.to_string(), task_id, label))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct AgentPatch {
    pub role: Option<String>,
    pub skills: Option<Vec<String>>,
    pub active: Option<bool>,
    pub max_liability: Option<i64>,
}
