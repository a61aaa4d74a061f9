//! `IdentityAdapter`: the name-resolution service keyed by worker handle.
//! A single adapter whose `UpdateAttributes` call is what carries
//! reputation forward to the outside world.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};

/// Selects which `IdentityAdapter` implementation the binary wires up;
/// identity only needs `{onchain, simulated}`, unlike escrow's three
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityBackendKind {
    Onchain,
    Simulated,
}

impl std::str::FromStr for IdentityBackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onchain" => Ok(Self::Onchain),
            "simulated" => Ok(Self::Simulated),
            other => Err(EngineError::identity(format!("unknown identity backend: {other}"))),
        }
    }
}

/// Backend-level handle returned by `Register`, used to address subsequent
/// attribute updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef(pub String);

#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub node_ref: NodeRef,
    pub wallet: String,
    pub attributes: HashMap<String, String>,
}

/// The attribute keys written verbatim on every settlement.
pub mod attribute_keys {
    pub const ROLE: &str = "role";
    pub const SKILLS: &str = "skills";
    pub const REPUTATION: &str = "reputation";
    pub const TASKS_COMPLETED: &str = "tasksCompleted";
    pub const TASKS_FAILED: &str = "tasksFailed";
    pub const DESCRIPTION: &str = "description";
}

#[async_trait]
pub trait IdentityAdapter: Send + Sync {
    /// Idempotent: if `handle` is already registered, returns the existing
    /// `NodeRef` with no effect.
    async fn register(
        &self,
        handle: &str,
        wallet: &str,
        initial_attributes: HashMap<String, String>,
    ) -> EngineResult<NodeRef>;

    async fn update_attributes(&self, node: &NodeRef, attrs: HashMap<String, String>) -> EngineResult<()>;

    async fn lookup(&self, handle: &str) -> EngineResult<IdentityRecord>;
}

/// A simulated name-resolution backend, keyed by handle, holding attributes
/// in memory and supporting full read/write lookup.
pub struct SimulatedIdentityAdapter {
    records: tokio::sync::RwLock<HashMap<String, IdentityRecord>>,
}

impl SimulatedIdentityAdapter {
    pub fn new() -> Self {
        Self {
            records: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    fn node_ref_for(handle: &str) -> NodeRef {
        NodeRef(format!("sim-node-{}", marketplace_core::wallet::canonicalize(handle)))
    }
}

impl Default for SimulatedIdentityAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityAdapter for SimulatedIdentityAdapter {
    async fn register(
        &self,
        handle: &str,
        wallet: &str,
        initial_attributes: HashMap<String, String>,
    ) -> EngineResult<NodeRef> {
        let key = marketplace_core::wallet::canonicalize(handle);
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&key) {
            return Ok(existing.node_ref.clone());
        }
        let node_ref = Self::node_ref_for(handle);
        records.insert(
            key,
            IdentityRecord {
                node_ref: node_ref.clone(),
                wallet: wallet.to_string(),
                attributes: initial_attributes,
            },
        );
        Ok(node_ref)
    }

    async fn update_attributes(&self, node: &NodeRef, attrs: HashMap<String, String>) -> EngineResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .values_mut()
            .find(|r| &r.node_ref == node)
            .ok_or_else(|| EngineError::NotRegistered(node.0.clone()))?;
        record.attributes.extend(attrs);
        Ok(())
    }

    async fn lookup(&self, handle: &str) -> EngineResult<IdentityRecord> {
        let key = marketplace_core::wallet::canonicalize(handle);
        self.records
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| EngineError::NotRegistered(handle.to_string()))
    }
}

/// Backed by a real name-service endpoint (on-chain resolver or a hosted
/// equivalent). The client implementation lives outside this crate; this
/// struct holds only the endpoint and signing parameters to reach it.
pub struct OnchainIdentityAdapter {
    pub backend_url: String,
    pub parent_namespace: String,
}

#[async_trait]
impl IdentityAdapter for OnchainIdentityAdapter {
    async fn register(
        &self,
        _handle: &str,
        _wallet: &str,
        _initial_attributes: HashMap<String, String>,
    ) -> EngineResult<NodeRef> {
        Err(EngineError::backend_unavailable(format!(
            "identity backend not reachable at {}",
            self.backend_url
        )))
    }

    async fn update_attributes(&self, _node: &NodeRef, _attrs: HashMap<String, String>) -> EngineResult<()> {
        Err(EngineError::backend_unavailable(format!(
            "identity backend not reachable at {}",
            self.backend_url
        )))
    }

    async fn lookup(&self, handle: &str) -> EngineResult<IdentityRecord> {
        Err(EngineError::NotRegistered(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_is_idempotent() {
        let adapter = SimulatedIdentityAdapter::new();
        let a = adapter.register("w1.eth", "0xAAA", HashMap::new()).await.unwrap();
        let b = adapter.register("w1.eth", "0xZZZ", HashMap::new()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn update_attributes_requires_registration() {
        let adapter = SimulatedIdentityAdapter::new();
        let err = adapter
            .update_attributes(&NodeRef("ghost".into()), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn lookup_returns_attributes() {
        let adapter = SimulatedIdentityAdapter::new();
        let mut attrs = HashMap::new();
        attrs.insert(attribute_keys::ROLE.to_string(), "worker".to_string());
        let node = adapter.register("w1.eth", "0xAAA", attrs).await.unwrap();
        adapter
            .update_attributes(&node, HashMap::from([(attribute_keys::REPUTATION.to_string(), "52".to_string())]))
            .await
            .unwrap();
        let record = adapter.lookup("w1.eth").await.unwrap();
        assert_eq!(record.attributes.get(attribute_keys::REPUTATION).unwrap(), "52");
    }
}
