//! Marketplace coordinator: store, escrow/identity adapters, state machine
//! wiring, and the settlement dispatcher.
//!
//! This crate is the long-running service core: it depends on `marketplace-core`
//! for the data model, error taxonomy, and pure state machine, and adds
//! everything that has to actually talk to a backend - the `Store`, the
//! `EscrowAdapter`/`IdentityAdapter` pair, the `SettlementDispatcher`, and
//! the `MarketplaceCoordinator` facade that ties them together for the
//! HTTP layer (`marketplace-api`).

pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod escrow;
pub mod identity;
pub mod store;

pub use coordinator::{AgentPatch, MarketplaceCoordinator, NodeHealth, TaskView};
pub use dispatcher::{Action, DispatcherConfig, SettlementDispatcher};
pub use error::{EngineError, EngineResult};
pub use escrow::{
    backend_key, ChannelEscrowAdapter, EscrowAdapter, EscrowBackendKind, EscrowQuery,
    OnchainEscrowAdapter, SimulatedEscrowAdapter,
};
pub use identity::{
    attribute_keys, IdentityAdapter, IdentityBackendKind, IdentityRecord, NodeRef,
    OnchainIdentityAdapter, SimulatedIdentityAdapter,
};
pub use store::{InMemoryStore, Store};

#[cfg(feature = "postgres")]
pub mod postgres_store;
