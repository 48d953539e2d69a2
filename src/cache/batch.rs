//! One batch of ledger updates.
//!
//! Every node touched by a batch (one committing transaction) is loaded
//! once, mutated in memory, and flushed at the end. Nothing is written
//! unless `flush` runs, so a batch abandoned half way leaves the ledger as
//! it was.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::debug;

use crate::model::NodeId;
use crate::storage::GraphAccess;
use crate::Result;
use super::DegreeCachingNode;

pub struct LedgerBatch<'g> {
    graph: &'g dyn GraphAccess,
    prefix: String,
    nodes: BTreeMap<NodeId, DegreeCachingNode>,
}

impl<'g> LedgerBatch<'g> {
    pub fn new(graph: &'g dyn GraphAccess, prefix: impl Into<String>) -> Self {
        Self {
            graph,
            prefix: prefix.into(),
            nodes: BTreeMap::new(),
        }
    }

    /// The ledger of `id`, loaded on first access.
    pub fn node(&mut self, id: NodeId) -> Result<&mut DegreeCachingNode> {
        match self.nodes.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(DegreeCachingNode::load(self.graph, id, &self.prefix)?)),
        }
    }

    /// Number of nodes loaded so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Persist every dirty ledger. Returns the number of nodes written.
    pub fn flush(mut self) -> Result<usize> {
        let mut written = 0;
        for node in self.nodes.values_mut() {
            if node.flush(self.graph)? > 0 {
                written += 1;
            }
        }
        debug!(nodes = self.nodes.len(), written, "relcount.batch.flushed");
        Ok(written)
    }
}
