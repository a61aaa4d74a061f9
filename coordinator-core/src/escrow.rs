//! `EscrowAdapter`: the thin interface to the value-bearing backend.
//!
//! A sum-type adapter with `onchain`/`channel`/`simulated` variants, each
//! behind the same trait so the coordinator never sees which one is in
//! play.

use async_trait::async_trait;
use marketplace_core::Receipt;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// `ESCROW_BACKEND`: selects which `EscrowAdapter` implementation the
/// binary wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowBackendKind {
    Onchain,
    Channel,
    Simulated,
}

impl std::str::FromStr for EscrowBackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onchain" => Ok(Self::Onchain),
            "channel" => Ok(Self::Channel),
            "simulated" => Ok(Self::Simulated),
            other => Err(EngineError::escrow(format!("unknown ESCROW_BACKEND: {other}"))),
        }
    }
}

/// A task's escrow position as the adapter sees it (`Query`).
#[derive(Debug, Clone)]
pub struct EscrowQuery {
    pub depositor: String,
    pub amount: i64,
    pub released: bool,
    pub refunded: bool,
}

#[async_trait]
pub trait EscrowAdapter: Send + Sync {
    /// Custodial deposit: the coordinator holds the signing key.
    /// Fails with `InsufficientFunds`/`AlreadyDeposited`.
    async fn deposit(&self, task_id: Uuid, amount: i64, depositor: &str) -> EngineResult<Receipt>;

    /// Verifying deposit: the poster's own wallet already deposited;
    /// the adapter only confirms it (variant b).
    async fn verify_deposit(
        &self,
        task_id: Uuid,
        external_ref: &str,
        expected_depositor: &str,
        expected_amount: i64,
    ) -> EngineResult<Receipt>;

    async fn release(&self, task_id: Uuid, recipient: &str) -> EngineResult<Receipt>;

    async fn refund(&self, task_id: Uuid) -> EngineResult<Receipt>;

    async fn query(&self, task_id: Uuid) -> EngineResult<EscrowQuery>;
}

/// Deterministic, collision-free backend key for a task id: the UUID
/// rendered as its fixed-width hyphenated hex string. Shared by every
/// adapter variant below.
pub fn backend_key(task_id: Uuid) -> String {
    task_id.as_hyphenated().to_string()
}

/// A simulated escrow backend producing deterministic receipts instead of
/// calling a real node. Suitable for tests and for `ESCROW_BACKEND=simulated`.
pub struct SimulatedEscrowAdapter {
    deposits: tokio::sync::RwLock<std::collections::HashMap<Uuid, (String, i64)>>,
    released: tokio::sync::RwLock<std::collections::HashSet<Uuid>>,
    refunded: tokio::sync::RwLock<std::collections::HashSet<Uuid>>,
}

impl SimulatedEscrowAdapter {
    pub fn new() -> Self {
        Self {
            deposits: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            released: tokio::sync::RwLock::new(std::collections::HashSet::new()),
            refunded: tokio::sync::RwLock::new(std::collections::HashSet::new()),
        }
    }

    fn receipt(task_id: Uuid, action: &str) -> Receipt {
        let key = backend_key(task_id);
        Receipt {
            reference: format!("sim-{action}-{key}"),
            sequence: Some(1),
            url: Some(format!("https://simulated.invalid/receipts/{key}")),
        }
    }
}

impl Default for SimulatedEscrowAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EscrowAdapter for SimulatedEscrowAdapter {
    async fn deposit(&self, task_id: Uuid, amount: i64, depositor: &str) -> EngineResult<Receipt> {
        let mut deposits = self.deposits.write().await;
        if deposits.contains_key(&task_id) {
            return Err(EngineError::AlreadyDeposited(backend_key(task_id)));
        }
        deposits.insert(task_id, (depositor.to_string(), amount));
        Ok(Self::receipt(task_id, "deposit"))
    }

    async fn verify_deposit(
        &self,
        task_id: Uuid,
        _external_ref: &str,
        expected_depositor: &str,
        expected_amount: i64,
    ) -> EngineResult<Receipt> {
        let mut deposits = self.deposits.write().await;
        if let Some((depositor, amount)) = deposits.get(&task_id) {
            if !marketplace_core::wallet::wallets_equal(depositor, expected_depositor) {
                return Err(EngineError::DepositorMismatch {
                    expected: expected_depositor.to_string(),
                    actual: depositor.clone(),
                });
            }
            if *amount != expected_amount {
                return Err(EngineError::AmountMismatch {
                    expected: expected_amount,
                    actual: *amount,
                });
            }
        } else {
            deposits.insert(task_id, (expected_depositor.to_string(), expected_amount));
        }
        Ok(Self::receipt(task_id, "verify"))
    }

    async fn release(&self, task_id: Uuid, _recipient: &str) -> EngineResult<Receipt> {
        let deposits = self.deposits.read().await;
        if !deposits.contains_key(&task_id) {
            return Err(EngineError::NotHeld(backend_key(task_id)));
        }
        let mut released = self.released.write().await;
        if released.contains(&task_id) {
            return Err(EngineError::AlreadySettled(backend_key(task_id)));
        }
        released.insert(task_id);
        Ok(Self::receipt(task_id, "release"))
    }

    async fn refund(&self, task_id: Uuid) -> EngineResult<Receipt> {
        let deposits = self.deposits.read().await;
        if !deposits.contains_key(&task_id) {
            return Err(EngineError::NotHeld(backend_key(task_id)));
        }
        let mut refunded = self.refunded.write().await;
        if refunded.contains(&task_id) {
            return Err(EngineError::AlreadySettled(backend_key(task_id)));
        }
        refunded.insert(task_id);
        Ok(Self::receipt(task_id, "refund"))
    }

    async fn query(&self, task_id: Uuid) -> EngineResult<EscrowQuery> {
        let deposits = self.deposits.read().await;
        let (depositor, amount) = deposits
            .get(&task_id)
            .cloned()
            .ok_or_else(|| EngineError::NotHeld(backend_key(task_id)))?;
        Ok(EscrowQuery {
            depositor,
            amount,
            released: self.released.read().await.contains(&task_id),
            refunded: self.refunded.read().await.contains(&task_id),
        })
    }
}

/// On-chain smart-contract-backed adapter. The actual RPC client is an
/// external collaborator; this struct owns only the connection parameters
/// and the retry-relevant mapping from RPC faults to `EngineError`.
pub struct OnchainEscrowAdapter {
    pub rpc_url: String,
    pub contract_address: String,
    pub chain_id: u64,
}

#[async_trait]
impl EscrowAdapter for OnchainEscrowAdapter {
    async fn deposit(&self, _task_id: Uuid, _amount: i64, _depositor: &str) -> EngineResult<Receipt> {
        Err(EngineError::backend_unavailable(format!(
            "onchain adapter not reachable at {}",
            self.rpc_url
        )))
    }

    async fn verify_deposit(
        &self,
        _task_id: Uuid,
        _external_ref: &str,
        _expected_depositor: &str,
        _expected_amount: i64,
    ) -> EngineResult<Receipt> {
        Err(EngineError::backend_unavailable(format!(
            "onchain adapter not reachable at {}",
            self.rpc_url
        )))
    }

    async fn release(&self, _task_id: Uuid, _recipient: &str) -> EngineResult<Receipt> {
        Err(EngineError::backend_unavailable(format!(
            "onchain adapter not reachable at {}",
            self.rpc_url
        )))
    }

    async fn refund(&self, _task_id: Uuid) -> EngineResult<Receipt> {
        Err(EngineError::backend_unavailable(format!(
            "onchain adapter not reachable at {}",
            self.rpc_url
        )))
    }

    async fn query(&self, task_id: Uuid) -> EngineResult<EscrowQuery> {
        Err(EngineError::NotHeld(backend_key(task_id)))
    }
}

/// Off-chain payment-channel-backed adapter: an optional alternative
/// settlement backend behind the same interface.
pub struct ChannelEscrowAdapter {
    pub channel_endpoint: String,
}

#[async_trait]
impl EscrowAdapter for ChannelEscrowAdapter {
    async fn deposit(&self, _task_id: Uuid, _amount: i64, _depositor: &str) -> EngineResult<Receipt> {
        Err(EngineError::backend_unavailable(format!(
            "channel adapter not reachable at {}",
            self.channel_endpoint
        )))
    }

    async fn verify_deposit(
        &self,
        _task_id: Uuid,
        _external_ref: &str,
        _expected_depositor: &str,
        _expected_amount: i64,
    ) -> EngineResult<Receipt> {
        Err(EngineError::backend_unavailable(format!(
            "channel adapter not reachable at {}",
            self.channel_endpoint
        )))
    }

    async fn release(&self, _task_id: Uuid, _recipient: &str) -> EngineResult<Receipt> {
        Err(EngineError::backend_unavailable(format!(
            "channel adapter not reachable at {}",
            self.channel_endpoint
        )))
    }

    async fn refund(&self, _task_id: Uuid) -> EngineResult<Receipt> {
        Err(EngineError::backend_unavailable(format!(
            "channel adapter not reachable at {}",
            self.channel_endpoint
        )))
    }

    async fn query(&self, task_id: Uuid) -> EngineResult<EscrowQuery> {
        Err(EngineError::NotHeld(backend_key(task_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_deposit_then_release() {
        let adapter = SimulatedEscrowAdapter::new();
        let task_id = Uuid::new_v4();
        adapter.deposit(task_id, 100, "0xAAA").await.unwrap();
        let receipt = adapter.release(task_id, "0xBBB").await.unwrap();
        assert!(receipt.reference.starts_with("sim-release-"));
    }

    #[tokio::test]
    async fn simulated_rejects_double_deposit() {
        let adapter = SimulatedEscrowAdapter::new();
        let task_id = Uuid::new_v4();
        adapter.deposit(task_id, 100, "0xAAA").await.unwrap();
        let err = adapter.deposit(task_id, 100, "0xAAA").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyDeposited(_)));
    }

    #[tokio::test]
    async fn verify_deposit_rejects_amount_mismatch() {
        let adapter = SimulatedEscrowAdapter::new();
        let task_id = Uuid::new_v4();
        adapter
            .verify_deposit(task_id, "ext-1", "0xAAA", 100)
            .await
            .unwrap();
        let err = adapter
            .verify_deposit(task_id, "ext-1", "0xAAA", 50)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AmountMismatch { .. }));
    }
}
