//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend` and `GraphAccess`.
//! It uses simple HashMaps protected by RwLock.
//!
//! ## Transactions
//!
//! - Writes are applied immediately and recorded in the transaction's undo
//!   log. `rollback_tx()` replays the log backwards.
//! - `commit_tx()` assembles the transaction's [`TransactionData`] and runs
//!   every registered listener against a view whose writes land in the same
//!   undo log. A failing listener rolls the whole transaction back.
//! - No isolation: concurrent transactions see each other's writes.
//!   Serialize writers touching the same nodes.
//!
//! Use this backend for:
//! - Testing the counting cache end to end
//! - Embedding in applications that don't need persistence

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::model::*;
use crate::tx::{Change, Transaction, TransactionData, TransactionListener, TxId, TxMode};
use crate::{Error, Result};
use super::{GraphAccess, StorageBackend};

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage.
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    nodes: RwLock<HashMap<NodeId, Node>>,
    relationships: RwLock<HashMap<RelId, Relationship>>,
    /// node_id → list of relationship IDs
    adjacency: RwLock<HashMap<NodeId, Vec<RelId>>>,
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                nodes: RwLock::new(HashMap::new()),
                relationships: RwLock::new(HashMap::new()),
                adjacency: RwLock::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
                next_node_id: AtomicU64::new(1),
                next_rel_id: AtomicU64::new(1),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    fn view(&self) -> MemoryView<'_> {
        MemoryView { inner: &self.inner, log: None }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// In-memory transaction: an undo log plus what the change feed needs.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    log: Mutex<TxLog>,
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

#[derive(Default)]
struct TxLog {
    undo: Vec<Undo>,
    created_rels: Vec<RelId>,
    /// State at transaction start of pre-existing relationships written to.
    touched_rels: BTreeMap<RelId, Relationship>,
    deleted_rels: Vec<RelId>,
    deleted_nodes: HashSet<NodeId>,
}

impl TxLog {
    fn touch(&mut self, rel: &Relationship) {
        if !self.created_rels.contains(&rel.id) {
            self.touched_rels.entry(rel.id).or_insert_with(|| rel.clone());
        }
    }
}

enum Undo {
    CreateNode(NodeId),
    DeleteNode(Node),
    NodeProperty { id: NodeId, key: String, previous: Option<Value> },
    CreateRelationship(RelId),
    DeleteRelationship(Relationship),
    RelationshipProperty { id: RelId, key: String, previous: Option<Value> },
}

fn log_mut(tx: &mut MemoryTx) -> Result<&mut TxLog> {
    if tx.mode == TxMode::ReadOnly {
        return Err(Error::TxError(format!("transaction {} is read-only", tx.id.0)));
    }
    Ok(tx.log.get_mut())
}

// ============================================================================
// Shared mutation helpers
// ============================================================================

fn attach(adj: &mut HashMap<NodeId, Vec<RelId>>, rel: &Relationship) {
    adj.entry(rel.src).or_default().push(rel.id);
    if rel.src != rel.dst {
        adj.entry(rel.dst).or_default().push(rel.id);
    }
}

fn detach(adj: &mut HashMap<NodeId, Vec<RelId>>, rel: &Relationship) {
    for end in [rel.src, rel.dst] {
        if let Some(rels) = adj.get_mut(&end) {
            rels.retain(|rid| *rid != rel.id);
        }
    }
}

impl MemoryInner {
    fn set_node_property(&self, log: Option<&mut TxLog>, id: NodeId, key: &str, val: Value) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        let previous = node.properties.insert(key.to_string(), val);
        if let Some(log) = log {
            log.undo.push(Undo::NodeProperty { id, key: key.to_string(), previous });
        }
        Ok(())
    }

    fn remove_node_property(&self, log: Option<&mut TxLog>, id: NodeId, key: &str) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        let previous = node.properties.remove(key);
        if let (Some(log), Some(previous)) = (log, previous) {
            log.undo.push(Undo::NodeProperty { id, key: key.to_string(), previous: Some(previous) });
        }
        Ok(())
    }

    fn incident(&self, node: NodeId) -> Vec<Relationship> {
        let rels = self.relationships.read();
        let adj = self.adjacency.read();
        adj.get(&node)
            .map(|ids| ids.iter().filter_map(|rid| rels.get(rid).cloned()).collect())
            .unwrap_or_default()
    }

    fn ledger_entries(&self, node: NodeId, prefix: &str) -> Result<Vec<(String, Value)>> {
        let nodes = self.nodes.read();
        let node = nodes.get(&node).ok_or_else(|| Error::NotFound(format!("Node {node}")))?;
        let mut entries: Vec<(String, Value)> = node
            .properties_with_prefix(prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn undo(&self, entry: Undo) {
        match entry {
            Undo::CreateNode(id) => {
                self.nodes.write().remove(&id);
                self.adjacency.write().remove(&id);
            }
            Undo::DeleteNode(node) => {
                self.adjacency.write().insert(node.id, Vec::new());
                self.nodes.write().insert(node.id, node);
            }
            Undo::NodeProperty { id, key, previous } => {
                if let Some(node) = self.nodes.write().get_mut(&id) {
                    match previous {
                        Some(val) => node.properties.insert(key, val),
                        None => node.properties.remove(&key),
                    };
                }
            }
            Undo::CreateRelationship(id) => {
                if let Some(rel) = self.relationships.write().remove(&id) {
                    detach(&mut self.adjacency.write(), &rel);
                }
            }
            Undo::DeleteRelationship(rel) => {
                let mut rels = self.relationships.write();
                attach(&mut self.adjacency.write(), &rel);
                rels.insert(rel.id, rel);
            }
            Undo::RelationshipProperty { id, key, previous } => {
                if let Some(rel) = self.relationships.write().get_mut(&id) {
                    match previous {
                        Some(val) => rel.properties.insert(key, val),
                        None => rel.properties.remove(&key),
                    };
                }
            }
        }
    }

    /// Net relationship changes recorded in `log`.
    fn transaction_data(&self, log: &TxLog) -> TransactionData {
        let rels = self.relationships.read();
        let created: HashSet<RelId> = log.created_rels.iter().copied().collect();

        let created_relationships = log.created_rels.iter().filter_map(|id| rels.get(id).cloned()).collect();

        let deleted_relationships = log
            .deleted_rels
            .iter()
            .filter(|id| !created.contains(id))
            .filter_map(|id| log.touched_rels.get(id).cloned())
            .collect();

        let changed_relationships = log
            .touched_rels
            .iter()
            .filter_map(|(id, previous)| {
                let current = rels.get(id)?;
                (current.properties != previous.properties)
                    .then(|| Change { previous: previous.clone(), current: current.clone() })
            })
            .collect();

        TransactionData {
            created_relationships,
            changed_relationships,
            deleted_relationships,
            deleted_nodes: log.deleted_nodes.clone(),
        }
    }
}

// ============================================================================
// GraphAccess views
// ============================================================================

/// `GraphAccess` over the live graph. Writes are recorded in `log` when one
/// is given (listener writes during commit).
struct MemoryView<'a> {
    inner: &'a MemoryInner,
    log: Option<&'a Mutex<TxLog>>,
}

impl GraphAccess for MemoryView<'_> {
    fn node(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.inner.nodes.read().get(&id).cloned())
    }

    fn ledger_entries(&self, node: NodeId, prefix: &str) -> Result<Vec<(String, Value)>> {
        self.inner.ledger_entries(node, prefix)
    }

    fn write_ledger_entry(&self, node: NodeId, key: &str, value: Value) -> Result<()> {
        match self.log {
            Some(log) => self.inner.set_node_property(Some(&mut *log.lock()), node, key, value),
            None => self.inner.set_node_property(None, node, key, value),
        }
    }

    fn remove_ledger_entry(&self, node: NodeId, key: &str) -> Result<()> {
        match self.log {
            Some(log) => self.inner.remove_node_property(Some(&mut *log.lock()), node, key),
            None => self.inner.remove_node_property(None, node, key),
        }
    }

    fn incident_relationships(&self, node: NodeId) -> Result<Vec<Relationship>> {
        Ok(self.inner.incident(node))
    }

    fn all_node_ids(&self) -> Result<Vec<NodeId>> {
        let mut ids: Vec<NodeId> = self.inner.nodes.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Auto-committed access, used outside transactions (module initialization,
/// counting).
impl GraphAccess for MemoryBackend {
    fn node(&self, id: NodeId) -> Result<Option<Node>> {
        self.view().node(id)
    }

    fn ledger_entries(&self, node: NodeId, prefix: &str) -> Result<Vec<(String, Value)>> {
        self.view().ledger_entries(node, prefix)
    }

    fn write_ledger_entry(&self, node: NodeId, key: &str, value: Value) -> Result<()> {
        self.view().write_ledger_entry(node, key, value)
    }

    fn remove_ledger_entry(&self, node: NodeId, key: &str) -> Result<()> {
        self.view().remove_ledger_entry(node, key)
    }

    fn incident_relationships(&self, node: NodeId) -> Result<Vec<Relationship>> {
        self.view().incident_relationships(node)
    }

    fn all_node_ids(&self) -> Result<Vec<NodeId>> {
        self.view().all_node_ids()
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    fn register_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.inner.listeners.write().push(listener);
    }

    fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        Ok(MemoryTx { id, mode, log: Mutex::new(TxLog::default()) })
    }

    fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        let data = self.inner.transaction_data(&tx.log.lock());
        if !data.is_empty() {
            let listeners = self.inner.listeners.read().clone();
            let outcome = {
                let view = MemoryView { inner: &self.inner, log: Some(&tx.log) };
                listeners.iter().try_for_each(|listener| listener.before_commit(&view, &data))
            };
            if let Err(e) = outcome {
                warn!(tx = tx.id.0, error = %e, "memory.tx.listener_failed");
                self.rollback_tx(tx)?;
                return Err(e);
            }
        }
        debug!(tx = tx.id.0, mutations = data.mutation_count(), "memory.tx.committed");
        Ok(())
    }

    fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        let log = tx.log.into_inner();
        let undone = log.undo.len();
        for entry in log.undo.into_iter().rev() {
            self.inner.undo(entry);
        }
        debug!(tx = tx.id.0, undone, "memory.tx.rolled_back");
        Ok(())
    }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    fn create_node(&self, tx: &mut MemoryTx, labels: &[&str], props: PropertyMap) -> Result<NodeId> {
        let log = log_mut(tx)?;
        let id = NodeId(self.inner.next_node_id.fetch_add(1, Ordering::Relaxed));
        let node = Node {
            id,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            properties: props,
        };

        self.inner.nodes.write().insert(id, node);
        self.inner.adjacency.write().insert(id, Vec::new());
        log.undo.push(Undo::CreateNode(id));

        Ok(id)
    }

    fn get_node(&self, _tx: &MemoryTx, id: NodeId) -> Result<Option<Node>> {
        Ok(self.inner.nodes.read().get(&id).cloned())
    }

    fn delete_node(&self, tx: &mut MemoryTx, id: NodeId) -> Result<bool> {
        let log = log_mut(tx)?;
        // Check for existing relationships (Neo4j semantics: can't delete connected node)
        {
            let adj = self.inner.adjacency.read();
            if let Some(rels) = adj.get(&id) {
                if !rels.is_empty() {
                    return Err(Error::ConstraintViolation(
                        format!("Cannot delete node {id} with {} relationships. Delete relationships first.", rels.len())
                    ));
                }
            }
        }

        let removed = self.inner.nodes.write().remove(&id);
        self.inner.adjacency.write().remove(&id);

        Ok(match removed {
            Some(node) => {
                log.deleted_nodes.insert(id);
                log.undo.push(Undo::DeleteNode(node));
                true
            }
            None => false,
        })
    }

    fn set_node_property(&self, tx: &mut MemoryTx, id: NodeId, key: &str, val: Value) -> Result<()> {
        let log = log_mut(tx)?;
        self.inner.set_node_property(Some(log), id, key, val)
    }

    fn remove_node_property(&self, tx: &mut MemoryTx, id: NodeId, key: &str) -> Result<()> {
        let log = log_mut(tx)?;
        self.inner.remove_node_property(Some(log), id, key)
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    fn create_relationship(
        &self,
        tx: &mut MemoryTx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        let log = log_mut(tx)?;
        // Verify both nodes exist
        {
            let nodes = self.inner.nodes.read();
            if !nodes.contains_key(&src) {
                return Err(Error::NotFound(format!("Source node {src}")));
            }
            if !nodes.contains_key(&dst) {
                return Err(Error::NotFound(format!("Target node {dst}")));
            }
        }

        let id = RelId(self.inner.next_rel_id.fetch_add(1, Ordering::Relaxed));
        let rel = Relationship {
            id,
            src,
            dst,
            rel_type: rel_type.to_string(),
            properties: props,
        };

        let mut rels = self.inner.relationships.write();
        attach(&mut self.inner.adjacency.write(), &rel);
        rels.insert(id, rel);

        log.created_rels.push(id);
        log.undo.push(Undo::CreateRelationship(id));
        Ok(id)
    }

    fn set_relationship_property(&self, tx: &mut MemoryTx, id: RelId, key: &str, val: Value) -> Result<()> {
        let log = log_mut(tx)?;
        let mut rels = self.inner.relationships.write();
        let rel = rels.get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        log.touch(rel);
        let previous = rel.properties.insert(key.to_string(), val);
        log.undo.push(Undo::RelationshipProperty { id, key: key.to_string(), previous });
        Ok(())
    }

    fn remove_relationship_property(&self, tx: &mut MemoryTx, id: RelId, key: &str) -> Result<()> {
        let log = log_mut(tx)?;
        let mut rels = self.inner.relationships.write();
        let rel = rels.get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        log.touch(rel);
        if let Some(previous) = rel.properties.remove(key) {
            log.undo.push(Undo::RelationshipProperty { id, key: key.to_string(), previous: Some(previous) });
        }
        Ok(())
    }

    fn delete_relationship(&self, tx: &mut MemoryTx, id: RelId) -> Result<bool> {
        let log = log_mut(tx)?;
        let mut rels = self.inner.relationships.write();
        let Some(rel) = rels.remove(&id) else {
            return Ok(false);
        };
        detach(&mut self.inner.adjacency.write(), &rel);

        log.touch(&rel);
        log.deleted_rels.push(id);
        log.undo.push(Undo::DeleteRelationship(rel));
        Ok(true)
    }

    // ========================================================================
    // Traversal and scan
    // ========================================================================

    fn get_relationships(
        &self,
        _tx: &MemoryTx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        Ok(self
            .inner
            .incident(node)
            .into_iter()
            .filter(|rel| match dir {
                Direction::Outgoing => rel.src == node,
                Direction::Incoming => rel.dst == node,
                Direction::Both => true,
            })
            .filter(|rel| rel_type.is_none_or(|t| rel.rel_type == t))
            .collect())
    }

    fn relationship_count(&self, _tx: &MemoryTx) -> Result<u64> {
        Ok(self.inner.relationships.read().len() as u64)
    }
}

// ============================================================================
// Tests
// ============================================================================
