//! Core data model for the job marketplace: agents, tasks, postings, bids,
//! and the append-only activity log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Review,
    Settlement,
    Completed,
    Reversed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Settlement => "settlement",
            Self::Completed => "completed",
            Self::Reversed => "reversed",
        }
    }
}

/// Escrow lifecycle status, tracked alongside `TaskStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    None,
    Pending,
    Held,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Held => "held",
            Self::Released => "released",
            Self::Refunded => "refunded",
        }
    }
}

/// An opaque settlement reference returned by an `EscrowAdapter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Backend-opaque reference string (tx hash, channel settlement id, ...).
    pub reference: String,
    /// Block height or sequence number, if the backend has one.
    pub sequence: Option<u64>,
    /// A human-viewable URL for the receipt, if the backend has one.
    pub url: Option<String>,
}

/// One submitted worker result for a task (`workResults`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    pub worker_id: String,
    pub result: serde_json::Value,
    pub submitted_at: DateTime<Utc>,
}

/// A task: the unit the coordinator escrows funds against and mediates
/// bidding, assignment, and settlement for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub budget: i64,
    pub status: TaskStatus,

    pub creator_wallet: String,
    pub assigned_agents: Vec<String>,
    pub work_results: Vec<WorkResult>,

    pub escrow_amount: i64,
    pub escrow_status: EscrowStatus,
    pub settlement_reference: Option<Receipt>,
    pub settlement_at: Option<DateTime<Utc>>,

    pub required_skills: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        title: String,
        description: Option<String>,
        budget: i64,
        creator_wallet: String,
        required_skills: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            description,
            budget,
            status: TaskStatus::Open,
            creator_wallet,
            assigned_agents: Vec::new(),
            work_results: Vec::new(),
            escrow_amount: budget,
            escrow_status: EscrowStatus::Pending,
            settlement_reference: None,
            settlement_at: None,
            required_skills,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_results(&self) -> bool {
        !self.work_results.is_empty()
    }
}

/// Job posting status, mirrored from the owning task's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingStatus {
    Open,
    Assigned,
    Closed,
}

/// World-readable counterpart of a `Task`, carrying the fields bidders need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: Uuid,
    pub task_id: Uuid,
    pub creator_wallet: String,
    pub title: String,
    pub description: Option<String>,
    pub budget: i64,
    pub required_skills: Vec<String>,
    pub status: PostingStatus,
    pub posted_at: DateTime<Utc>,
}

impl JobPosting {
    pub fn new(task: &Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            creator_wallet: task.creator_wallet.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            budget: task.budget,
            required_skills: task.required_skills.clone(),
            status: PostingStatus::Open,
            posted_at: task.created_at,
        }
    }

    /// Mirror this posting's status from the task's current status:
    /// `open<->open; else assigned/closed`.
    pub fn sync_from_task_status(&mut self, task_status: TaskStatus) {
        self.status = match task_status {
            TaskStatus::Open => PostingStatus::Open,
            TaskStatus::InProgress | TaskStatus::Review | TaskStatus::Settlement => {
                PostingStatus::Assigned
            }
            TaskStatus::Completed | TaskStatus::Reversed => PostingStatus::Closed,
        };
    }
}

/// A worker's bid on a job posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
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

impl Bid {
    pub fn new(
        job_id: Uuid,
        worker_id: String,
        worker_handle: String,
        message: String,
        relevance_score: i32,
        estimated_time: String,
        proposed_amount: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            worker_id,
            worker_handle,
            message,
            relevance_score,
            estimated_time,
            proposed_amount,
            accepted: false,
            created_at: Utc::now(),
        }
    }
}

/// An autonomous worker, identified by a globally unique handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub handle: String,
    pub wallet: String,
    pub role: String,
    pub skills: Vec<String>,
    pub reputation: i32,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub active: bool,
    pub max_liability: i64,
    pub identity_registered: bool,
    pub identity_node: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Clamp bounds for `Agent::reputation`, kept in [0,100].
pub const REPUTATION_MIN: i32 = 0;
pub const REPUTATION_MAX: i32 = 100;
/// Default reputation assigned to a newly-upserted agent.
pub const REPUTATION_DEFAULT: i32 = 50;

impl Agent {
    pub fn new(handle: String, wallet: String, role: String, skills: Vec<String>, max_liability: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            handle,
            wallet,
            role,
            skills,
            reputation: REPUTATION_DEFAULT,
            tasks_completed: 0,
            tasks_failed: 0,
            active: true,
            max_liability,
            identity_registered: false,
            identity_node: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reputation tier, a read-only convenience derived from the score;
    /// never influences settlement logic.
    pub fn reputation_tier(&self) -> &'static str {
        match self.reputation {
            0..=29 => "New",
            30..=69 => "Established",
            _ => "Trusted",
        }
    }

    pub fn clamp_reputation(value: i32) -> i32 {
        value.clamp(REPUTATION_MIN, REPUTATION_MAX)
    }
}

/// Stable, uppercase activity labels.
pub mod activity_labels {
    pub const TASK_CREATED: &str = "TASK_CREATED";
    pub const ESCROW_HELD: &str = "ESCROW_HELD";
    pub const BID_SUBMITTED: &str = "BID_SUBMITTED";
    pub const BID_ACCEPTED: &str = "BID_ACCEPTED";
    pub const WORK_SUBMITTED: &str = "WORK_SUBMITTED";
    pub const PAYMENT_SETTLED: &str = "PAYMENT_SETTLED";
    pub const SETTLEMENT_FAILED: &str = "SETTLEMENT_FAILED";
    pub const REFUND_PROCESSED: &str = "REFUND_PROCESSED";

    pub fn status_changed_to(status: &str) -> String {
        format!("STATUS_CHANGED_TO_{}", status.to_uppercase().replace('-', "_"))
    }
}

/// The reserved actor id for coordinator-originated events.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// An immutable append-only log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub actor_id: String,
    pub task_id: Uuid,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

impl Activity {
    pub fn new(actor_id: String, task_id: Uuid, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            task_id,
            action: action.into(),
            timestamp: Utc::now(),
        }
    }
}
