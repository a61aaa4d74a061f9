//! Request/response bodies for the REST surface. These are the only place
//! `camelCase` field names appear - the wire contract's literal field names
//! (`creatorWallet`, `requiredSkills`, ...) - while `marketplace-core`'s
//! domain types stay in plain snake_case. Handlers translate between the
//! two.

use chrono::{DateTime, Utc};
use marketplace_core::{Activity, Agent, Bid, JobPosting, Task};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub components: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertAgentRequest {
    pub handle: String,
    pub wallet: String,
    pub role: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub max_liability: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchAgentRequest {
    pub role: Option<String>,
    pub skills: Option<Vec<String>>,
    pub active: Option<bool>,
    pub max_liability: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub id: Uuid,
    pub handle: String,
    pub wallet: String,
    pub role: String,
    pub skills: Vec<String>,
    pub reputation: i32,
    pub reputation_tier: &'static str,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub active: bool,
    pub max_liability: i64,
    pub identity_registered: bool,
}

impl From<Agent> for AgentResponse {
    fn from(a: Agent) -> Self {
        let reputation_tier = a.reputation_tier();
        Self {
            id: a.id,
            handle: a.handle,
            wallet: a.wallet,
            role: a.role,
            skills: a.skills,
            reputation: a.reputation,
            reputation_tier,
            tasks_completed: a.tasks_completed,
            tasks_failed: a.tasks_failed,
            active: a.active,
            max_liability: a.max_liability,
            identity_registered: a.identity_registered,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub title: String,
    pub description: Option<String>,
    pub budget: i64,
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub creator_wallet: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmEscrowRequest {
    pub external_ref: String,
    pub depositor_wallet: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBidRequest {
    pub worker_id: String,
    pub worker_handle: String,
    pub message: String,
    pub relevance_score: i32,
    pub estimated_time: String,
    pub proposed_amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptBidRequest {
    pub bid_id: Uuid,
    pub caller_wallet: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitWorkRequest {
    pub worker_id: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub caller_wallet: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceStatusRequest {
    pub status: String,
    pub agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub budget: i64,
    pub status: &'static str,
    pub creator_wallet: String,
    pub assigned_agents: Vec<String>,
    /// Only populated when the caller is the creator ("Result visibility").
    pub work_results: Option<Vec<serde_json::Value>>,
    pub has_results: bool,
    pub escrow_amount: i64,
    pub escrow_status: &'static str,
    pub settlement_reference: Option<marketplace_core::Receipt>,
    pub settlement_at: Option<DateTime<Utc>>,
    pub required_skills: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskResponse {
    pub fn from_view(view: coordinator_core::TaskView) -> Self {
        let task: Task = view.task;
        let work_results = if view.is_creator {
            Some(task.work_results.iter().map(|r| r.result.clone()).collect())
        } else {
            None
        };
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            budget: task.budget,
            status: task.status.as_str(),
            creator_wallet: task.creator_wallet,
            assigned_agents: task.assigned_agents,
            work_results,
            has_results: view.has_results,
            escrow_amount: task.escrow_amount,
            escrow_status: task.escrow_status.as_str(),
            settlement_reference: task.settlement_reference,
            settlement_at: task.settlement_at,
            required_skills: task.required_skills,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }

    /// For list endpoints, where the caller is always the creator
    /// (`list_tasks_for`/`Tasks.ListByCreator`).
    pub fn from_owned_task(task: Task) -> Self {
        let has_results = task.has_results();
        let work_results = Some(task.work_results.iter().map(|r| r.result.clone()).collect());
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            budget: task.budget,
            status: task.status.as_str(),
            creator_wallet: task.creator_wallet,
            assigned_agents: task.assigned_agents,
            work_results,
            has_results,
            escrow_amount: task.escrow_amount,
            escrow_status: task.escrow_status.as_str(),
            settlement_reference: task.settlement_reference,
            settlement_at: task.settlement_at,
            required_skills: task.required_skills,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingResponse {
    pub id: Uuid,
    pub task_id: Uuid,
    pub creator_wallet: String,
    pub title: String,
    pub description: Option<String>,
    pub budget: i64,
    pub required_skills: Vec<String>,
    pub status: &'static str,
    pub posted_at: DateTime<Utc>,
    pub bids: Vec<BidResponse>,
}

impl PostingResponse {
    pub fn new(posting: JobPosting, bids: Vec<Bid>) -> Self {
        Self {
            id: posting.id,
            task_id: posting.task_id,
            creator_wallet: posting.creator_wallet,
            title: posting.title,
            description: posting.description,
            budget: posting.budget,
            required_skills: posting.required_skills,
            status: match posting.status {
                marketplace_core::PostingStatus::Open => "open",
                marketplace_core::PostingStatus::Assigned => "assigned",
                marketplace_core::PostingStatus::Closed => "closed",
            },
            posted_at: posting.posted_at,
            bids: bids.into_iter().map(BidResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidResponse {
    pub id: Uuid,
    pub job_id: Uuid,
    pub worker_id: String,
    pub worker_handle: String,
    pub message: String,
    pub relevance_score: i32,
    pub estimated_time: String,
    pub proposed_amount: i64,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Bid> for BidResponse {
    fn from(b: Bid) -> Self {
        Self {
            id: b.id,
            job_id: b.job_id,
            worker_id: b.worker_id,
            worker_handle: b.worker_handle,
            message: b.message,
            relevance_score: b.relevance_score,
            estimated_time: b.estimated_time,
            proposed_amount: b.proposed_amount,
            accepted: b.accepted,
            created_at: b.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub id: Uuid,
    pub actor_id: String,
    pub task_id: Uuid,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

impl From<Activity> for ActivityResponse {
    fn from(a: Activity) -> Self {
        Self {
            id: a.id,
            actor_id: a.actor_id,
            task_id: a.task_id,
            action: a.action,
            timestamp: a.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityLookupResponse {
    pub node_ref: String,
    pub wallet: String,
    pub attributes: std::collections::HashMap<String, String>,
}
