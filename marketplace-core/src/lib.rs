//! Core types, error taxonomy, and the pure task state machine for the
//! marketplace coordinator.
//!
//! This crate has no knowledge of HTTP, storage, or any particular escrow
//! or identity backend - that belongs to `coordinator-core`. It owns only
//! the data model and the pure `(Task, Event) -> (Task, [SideEffect])`
//! transition function that every other crate builds on.

pub mod error;
pub mod events;
pub mod state_machine;
pub mod types;
pub mod wallet;

pub use error::{CoreError, CoreResult};
pub use events::{Event, SideEffect};
pub use types::{
    activity_labels, Activity, Agent, Bid, EscrowStatus, JobPosting, PostingStatus, Receipt, Task,
    TaskStatus, WorkResult, SYSTEM_ACTOR,
};
