//! # Storage Backend Traits
//!
//! Two contracts between the counting cache and a graph store:
//!
//! - [`StorageBackend`]: transaction-scoped graph CRUD, used by applications
//!   to mutate the graph. Committing a transaction delivers its
//!   [`TransactionData`](crate::tx::TransactionData) to every registered
//!   [`TransactionListener`].
//! - [`GraphAccess`]: the narrow, object-safe view the counting cache needs:
//!   per-node ledger entries, incident relationships and a node scan.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory, with undo-log rollback |

pub mod memory;

use std::sync::Arc;

use crate::model::*;
use crate::tx::{Transaction, TransactionListener, TxMode};
use crate::Result;

pub use memory::MemoryBackend;

// ============================================================================
// GraphAccess Trait
// ============================================================================

/// What the counting cache reads and writes.
///
/// Ledger entries are ordinary node properties; the cache only ever touches
/// keys under its own prefix.
pub trait GraphAccess {
    /// Get a node by ID. Returns None if not found.
    fn node(&self, id: NodeId) -> Result<Option<Node>>;

    /// All properties of `node` whose key starts with `prefix`.
    fn ledger_entries(&self, node: NodeId, prefix: &str) -> Result<Vec<(String, Value)>>;

    /// Upsert one ledger entry.
    fn write_ledger_entry(&self, node: NodeId, key: &str, value: Value) -> Result<()>;

    /// Remove one ledger entry. Removing a missing key is not an error.
    fn remove_ledger_entry(&self, node: NodeId, key: &str) -> Result<()>;

    /// Every relationship with `node` on either end. Self-relationships appear once.
    fn incident_relationships(&self, node: NodeId) -> Result<Vec<Relationship>>;

    /// IDs of every node in the graph.
    fn all_node_ids(&self) -> Result<Vec<NodeId>>;
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The transactional storage contract.
///
/// Writes on a read-only transaction fail with `Error::TxError`.
pub trait StorageBackend: Send + Sync + 'static {
    /// The transaction type for this backend.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register a hook run before every commit.
    fn register_listener(&self, listener: Arc<dyn TransactionListener>);

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction.
    fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction. If a listener fails, the transaction is rolled
    /// back and the listener's error returned.
    fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Roll back a transaction, undoing all of its writes.
    fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node with the given labels and properties.
    fn create_node(&self, tx: &mut Self::Tx, labels: &[&str], props: PropertyMap) -> Result<NodeId>;

    /// Get a node by ID. Returns None if not found.
    fn get_node(&self, tx: &Self::Tx, id: NodeId) -> Result<Option<Node>>;

    /// Delete a node. Returns true if it existed.
    /// Fails if the node still has relationships (Neo4j semantics).
    fn delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool>;

    /// Set a property on a node (upsert).
    fn set_node_property(&self, tx: &mut Self::Tx, id: NodeId, key: &str, val: Value) -> Result<()>;

    /// Remove a property from a node.
    fn remove_node_property(&self, tx: &mut Self::Tx, id: NodeId, key: &str) -> Result<()>;

    /// Delete a node and all its relationships in one operation.
    /// Neo4j: `DETACH DELETE n`
    ///
    /// Default: get all relationships, delete each, then delete the node.
    fn detach_delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool> {
        let rels = self.get_relationships(tx, id, Direction::Both, None)?;
        for rel in &rels {
            self.delete_relationship(tx, rel.id)?;
        }
        self.delete_node(tx, id)
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    /// Create a relationship between two nodes.
    fn create_relationship(
        &self,
        tx: &mut Self::Tx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId>;

    /// Delete a relationship. Returns true if it existed.
    fn delete_relationship(&self, tx: &mut Self::Tx, id: RelId) -> Result<bool>;

    /// Set a property on a relationship (upsert).
    fn set_relationship_property(&self, tx: &mut Self::Tx, id: RelId, key: &str, val: Value) -> Result<()>;

    /// Remove a property from a relationship.
    fn remove_relationship_property(&self, tx: &mut Self::Tx, id: RelId, key: &str) -> Result<()>;

    // ========================================================================
    // Traversal and scan
    // ========================================================================

    /// Get all relationships of a node, optionally filtered by direction and type.
    fn get_relationships(
        &self,
        tx: &Self::Tx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>>;

    /// Total number of relationships.
    fn relationship_count(&self, tx: &Self::Tx) -> Result<u64>;

    // ========================================================================
    // Batch operations
    // ========================================================================

    /// Batch create relationships. All of them reach listeners as one batch
    /// when `tx` commits.
    ///
    /// Default falls back to sequential `create_relationship` calls.
    fn create_relationships_batch(
        &self,
        tx: &mut Self::Tx,
        rels: Vec<(NodeId, NodeId, String, PropertyMap)>,
    ) -> Result<Vec<RelId>> {
        let mut ids = Vec::with_capacity(rels.len());
        for (src, dst, rel_type, props) in rels {
            ids.push(self.create_relationship(tx, src, dst, &rel_type, props)?);
        }
        Ok(ids)
    }
}
