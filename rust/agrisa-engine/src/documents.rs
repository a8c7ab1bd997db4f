//! Policy document storage contract
//!
//! Template filling and object storage are external; the engine only ever
//! asks for temporary draft documents to be discarded.

use crate::domain::BasePolicyId;
use crate::error::EngineResult;
use async_trait::async_trait;

/// External document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Remove the temporary documents staged for a draft base policy
    async fn delete_temp(&self, base_policy_id: BasePolicyId) -> EngineResult<()>;
}

/// Document store that discards nothing; used by tests and as a default
pub struct NoopDocumentStore;

#[async_trait]
impl DocumentStore for NoopDocumentStore {
    async fn delete_temp(&self, _base_policy_id: BasePolicyId) -> EngineResult<()> {
        Ok(())
    }
}
