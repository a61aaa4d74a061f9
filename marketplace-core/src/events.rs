//! Events accepted by the `TaskStateMachine` and the side effects it emits
//! in response. The state machine itself is pure: it never performs
//! I/O, it only decides what *should* happen next.

use serde_json::Value;
use uuid::Uuid;

/// An event applied to a single task.
#[derive(Debug, Clone)]
pub enum Event {
    CreateJob,
    DepositConfirmed,
    AcceptBid { bid_id: Uuid, worker_id: String },
    SubmitWork { worker_id: String, result: Value },
    SettlementSucceeded,
    SettlementFailed,
    RefundRequested { caller_wallet: String },
    ForceClose,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CreateJob => "CreateJob",
            Event::DepositConfirmed => "DepositConfirmed",
            Event::AcceptBid { .. } => "AcceptBid",
            Event::SubmitWork { .. } => "SubmitWork",
            Event::SettlementSucceeded => "SettlementSucceeded",
            Event::SettlementFailed => "SettlementFailed",
            Event::RefundRequested { .. } => "RefundRequested",
            Event::ForceClose => "ForceClose",
        }
    }
}

/// A side effect the state machine asks the caller to carry out after
/// committing a transition. The `SettlementDispatcher` (coordinator-core)
/// is the only consumer of `Settle`/`Refund`/`UpdateReputation`; activity
/// appends and escrow-receipt storage happen inline by the caller.
#[derive(Debug, Clone)]
pub enum SideEffect {
    /// Enqueue a `Settle` action for this task (release escrow to the
    /// assigned worker).
    EnqueueSettle { task_id: Uuid, worker_id: String },
    /// Enqueue a `Refund` action for this task.
    EnqueueRefund { task_id: Uuid },
    /// Enqueue a reputation update for a worker following settlement.
    EnqueueReputationUpdate { worker_id: String, success: bool },
    /// Append an activity log entry.
    AppendActivity {
        actor_id: String,
        task_id: Uuid,
        action: String,
    },
}
