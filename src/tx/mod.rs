//! Transaction management and the change feed delivered on commit.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{NodeId, Relationship};
use crate::storage::GraphAccess;
use crate::Result;

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

/// Transaction trait that all backends must implement.
pub trait Transaction: Send + Sync {
    fn mode(&self) -> TxMode;
    fn id(&self) -> TxId;
}

// ============================================================================
// Change feed
// ============================================================================

/// Before and after snapshots of an entity changed in a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub previous: T,
    pub current: T,
}

/// Net effect of one committed transaction on relationships.
///
/// - a relationship created and deleted in the same transaction is not reported
/// - `changed_relationships` carry the state from the start of the transaction
///   as `previous`, and are omitted when the properties ended up identical
/// - `deleted_relationships` carry their state from the start of the transaction
#[derive(Debug, Clone, Default)]
pub struct TransactionData {
    pub created_relationships: Vec<Relationship>,
    pub changed_relationships: Vec<Change<Relationship>>,
    pub deleted_relationships: Vec<Relationship>,
    pub deleted_nodes: HashSet<NodeId>,
}

impl TransactionData {
    pub fn is_empty(&self) -> bool {
        self.created_relationships.is_empty()
            && self.changed_relationships.is_empty()
            && self.deleted_relationships.is_empty()
    }

    pub fn has_been_deleted(&self, node: NodeId) -> bool {
        self.deleted_nodes.contains(&node)
    }

    /// Number of relationship mutations in this transaction.
    pub fn mutation_count(&self) -> usize {
        self.created_relationships.len() + self.changed_relationships.len() + self.deleted_relationships.len()
    }
}

/// Hook run inside a transaction just before it commits.
///
/// `graph` writes become part of the committing transaction. Returning an
/// error aborts the commit and rolls every write back, the listener's
/// included.
pub trait TransactionListener: Send + Sync {
    fn before_commit(&self, graph: &dyn GraphAccess, data: &TransactionData) -> Result<()>;
}
