//! Ledger first, traversal when the ledger cannot tell.

use tracing::debug;

use crate::model::NodeId;
use crate::signature::RelationshipSignature;
use crate::storage::GraphAccess;
use crate::{Error, Result};
use super::{CachedCounter, NaiveCounter, RelationshipCounter};

/// Always exact. Only fails when the module is inactive or storage fails.
#[derive(Debug, Clone)]
pub struct FallbackCounter {
    cached: CachedCounter,
    naive: NaiveCounter,
}

impl FallbackCounter {
    pub fn new(cached: CachedCounter, naive: NaiveCounter) -> Self {
        Self { cached, naive }
    }
}

impl RelationshipCounter for FallbackCounter {
    fn count(&self, graph: &dyn GraphAccess, node: NodeId, query: &RelationshipSignature) -> Result<u64> {
        match self.cached.count(graph, node, query) {
            Err(Error::UnableToCount(reason)) => {
                debug!(node = node.0, query = %query, reason = %reason, "relcount.counter.fallback");
                self.naive.count(graph, node, query)
            }
            other => other,
        }
    }
}
