//! The pure task state machine: `(Task, Event) -> (Task, [SideEffect])`.
//!
//! This module performs no I/O. It is the single authority on which
//! `(status, escrowStatus)` transitions are legal; everything else in the
//! coordinator either asks it to transition a task or reacts to the side
//! effects it emits.

use crate::error::{CoreError, CoreResult};
use crate::events::{Event, SideEffect};
use crate::types::{activity_labels, Bid, EscrowStatus, JobPosting, Task, TaskStatus, SYSTEM_ACTOR};
use crate::wallet::wallets_equal;

/// Construct a brand-new task and its posting for `CreateJob` (first
/// row has no "from" state, so it is a constructor rather than a transition
/// over an existing task).
pub fn create_job(
    title: String,
    description: Option<String>,
    budget: i64,
    creator_wallet: String,
    required_skills: Vec<String>,
) -> CoreResult<(Task, JobPosting, Vec<SideEffect>)> {
    if budget <= 0 {
        return Err(CoreError::validation("budget must be greater than 0"));
    }
    if title.trim().is_empty() {
        return Err(CoreError::validation("title must not be empty"));
    }
    if creator_wallet.trim().is_empty() {
        return Err(CoreError::validation("creatorWallet must not be empty"));
    }

    let task = Task::new(title, description, budget, creator_wallet, required_skills);
    let posting = JobPosting::new(&task);

    let effects = vec![SideEffect::AppendActivity {
        actor_id: SYSTEM_ACTOR.to_string(),
        task_id: task.id,
        action: activity_labels::TASK_CREATED.to_string(),
    }];

    Ok((task, posting, effects))
}

/// Apply an event to an existing task, returning the new task state and the
/// side effects the caller must carry out. Rejects any event not legal for
/// the task's current `(status, escrowStatus)` with `InvalidTransition`.
pub fn apply(task: &Task, event: Event) -> CoreResult<(Task, Vec<SideEffect>)> {
    let mut next = task.clone();
    let mut effects = Vec::new();

    match event {
        Event::CreateJob => {
            return Err(CoreError::invalid_transition(
                task.status.as_str().to_string(),
                "CreateJob only applies to a not-yet-existing task".to_string(),
            ));
        }

        Event::DepositConfirmed => {
            require(task, TaskStatus::Open, EscrowStatus::Pending, &event)?;
            next.escrow_status = EscrowStatus::Held;
            next.updated_at = chrono::Utc::now();
            effects.push(activity(task, SYSTEM_ACTOR, activity_labels::ESCROW_HELD));
        }

        Event::AcceptBid { worker_id, .. } => {
            require(task, TaskStatus::Open, EscrowStatus::Held, &event)?;
            next.status = TaskStatus::InProgress;
            next.assigned_agents.push(worker_id);
            next.updated_at = chrono::Utc::now();
            effects.push(activity(task, SYSTEM_ACTOR, activity_labels::BID_ACCEPTED));
        }

        Event::SubmitWork { worker_id, result } => {
            require(task, TaskStatus::InProgress, EscrowStatus::Held, &event)?;
            next.status = TaskStatus::Settlement;
            next.work_results.push(crate::types::WorkResult {
                worker_id: worker_id.clone(),
                result,
                submitted_at: chrono::Utc::now(),
            });
            next.updated_at = chrono::Utc::now();
            effects.push(SideEffect::EnqueueSettle {
                task_id: task.id,
                worker_id,
            });
            effects.push(activity(task, SYSTEM_ACTOR, activity_labels::WORK_SUBMITTED));
        }

        Event::SettlementSucceeded => {
            require(task, TaskStatus::Settlement, EscrowStatus::Held, &event)?;
            next.status = TaskStatus::Completed;
            next.escrow_status = EscrowStatus::Released;
            next.settlement_at = Some(chrono::Utc::now());
            next.updated_at = chrono::Utc::now();

            if let Some(worker_id) = task.assigned_agents.last().cloned() {
                effects.push(SideEffect::EnqueueReputationUpdate {
                    worker_id,
                    success: true,
                });
            }
            effects.push(activity(task, SYSTEM_ACTOR, activity_labels::PAYMENT_SETTLED));
        }

        Event::SettlementFailed => {
            require(task, TaskStatus::Settlement, EscrowStatus::Held, &event)?;
            next.status = TaskStatus::Review;
            next.updated_at = chrono::Utc::now();
            effects.push(activity(task, SYSTEM_ACTOR, activity_labels::SETTLEMENT_FAILED));
        }

        Event::RefundRequested { caller_wallet } => {
            let status_ok = matches!(task.status, TaskStatus::Open | TaskStatus::InProgress);
            if !status_ok || task.escrow_status != EscrowStatus::Held {
                return Err(invalid_transition_err(task, &event));
            }
            if !wallets_equal(&caller_wallet, &task.creator_wallet) {
                return Err(CoreError::authorization(
                    "only the task creator may request a refund",
                ));
            }
            next.status = TaskStatus::Reversed;
            next.escrow_status = EscrowStatus::Refunded;
            next.updated_at = chrono::Utc::now();
            effects.push(activity(task, SYSTEM_ACTOR, activity_labels::REFUND_PROCESSED));
        }

        Event::ForceClose => {
            require(task, TaskStatus::Review, EscrowStatus::Held, &event)?;
            next.status = TaskStatus::Reversed;
            next.escrow_status = EscrowStatus::Refunded;
            next.updated_at = chrono::Utc::now();
            effects.push(activity(task, SYSTEM_ACTOR, activity_labels::REFUND_PROCESSED));
        }
    }

    effects.push(SideEffect::AppendActivity {
        actor_id: SYSTEM_ACTOR.to_string(),
        task_id: task.id,
        action: activity_labels::status_changed_to(next.status.as_str()),
    });

    Ok((next, effects))
}

fn require(task: &Task, status: TaskStatus, escrow: EscrowStatus, event: &Event) -> CoreResult<()> {
    if task.status == status && task.escrow_status == escrow {
        Ok(())
    } else {
        Err(invalid_transition_err(task, event))
    }
}

fn invalid_transition_err(task: &Task, event: &Event) -> CoreError {
    CoreError::invalid_transition(
        format!("{}/{}", task.status.as_str(), task.escrow_status.as_str()),
        format!("event {} is not legal from this state", event.name()),
    )
}

fn activity(task: &Task, actor: &str, label: &str) -> SideEffect {
    SideEffect::AppendActivity {
        actor_id: actor.to_string(),
        task_id: task.id,
        action: label.to_string(),
    }
}

/// Mark a bid accepted within the in-memory view of a posting's bid list,
/// enforcing "at most one accepted per jobId". Callers use the store's
/// `Bids.MarkAccepted` for the durable operation; this helper is the pure
/// decision of whether doing so is legal given the current bids.
pub fn validate_bid_acceptance(bids: &[Bid], bid_id: uuid::Uuid) -> CoreResult<&Bid> {
    if bids.iter().any(|b| b.accepted) {
        return Err(CoreError::conflict("a bid on this job is already accepted"));
    }
    bids.iter()
        .find(|b| b.id == bid_id)
        .ok_or_else(|| CoreError::not_found("bid not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_held_task() -> Task {
        let (mut task, _posting, _fx) =
            create_job("Summarize".into(), None, 100, "0xAAA".into(), vec!["text-summarization".into()]).unwrap();
        task.escrow_status = EscrowStatus::Held;
        task
    }

    #[test]
    fn rejects_zero_budget() {
        let err = create_job("x".into(), None, 0, "0xAAA".into(), vec![]).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn happy_path_transitions() {
        let task = open_held_task();
        let (task, _fx) = apply(
            &task,
            Event::AcceptBid {
                bid_id: uuid::Uuid::new_v4(),
                worker_id: "worker-1".into(),
            },
        )
        .unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);

        let (task, fx) = apply(
            &task,
            Event::SubmitWork {
                worker_id: "worker-1".into(),
                result: json!({"summary": "..."}),
            },
        )
        .unwrap();
        assert_eq!(task.status, TaskStatus::Settlement);
        assert!(fx
            .iter()
            .any(|e| matches!(e, SideEffect::EnqueueSettle { .. })));

        let (task, _fx) = apply(&task, Event::SettlementSucceeded).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.escrow_status, EscrowStatus::Released);
    }

    #[test]
    fn rejects_event_not_legal_for_state() {
        let task = open_held_task();
        let err = apply(&task, Event::SettlementSucceeded).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn refund_requires_creator() {
        let task = open_held_task();
        let err = apply(
            &task,
            Event::RefundRequested {
                caller_wallet: "0xBBB".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));
    }

    #[test]
    fn refund_from_open_succeeds_for_creator() {
        let task = open_held_task();
        let (task, _fx) = apply(
            &task,
            Event::RefundRequested {
                caller_wallet: "0xaaa".into(),
            },
        )
        .unwrap();
        assert_eq!(task.status, TaskStatus::Reversed);
        assert_eq!(task.escrow_status, EscrowStatus::Refunded);
    }
}
