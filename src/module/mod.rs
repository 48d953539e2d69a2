//! # Relationship Count Module
//!
//! Owns one ledger namespace (`_GA_<id>_`) and keeps it in step with the
//! graph: registered as a [`TransactionListener`], it turns each committing
//! transaction's change feed into increments, decrements and changes on the
//! ledgers of the touched nodes, inside that same transaction.
//!
//! ## Lifecycle
//!
//! | Call | Effect |
//! |------|--------|
//! | `start` | listen to commits; counters usable |
//! | `initialize` | rebuild every ledger from the graph, then start |
//! | `reinitialize` | shut down, erase the namespace, initialize |
//! | `shutdown` | stop listening; counters fail with `EngineInactive` |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};
use tracing::{debug, info};

use crate::cache::{DegreeCachingNode, LedgerBatch};
use crate::config::RelationshipCountConfig;
use crate::count::{CachedCounter, FallbackCounter, NaiveCounter};
use crate::model::{Direction, NodeId, Relationship};
use crate::storage::{GraphAccess, StorageBackend};
use crate::tx::{TransactionData, TransactionListener};
use crate::{Error, Result};

/// Namespace of every internal key.
const NAMESPACE: &str = "_GA_";

#[derive(Debug, Clone)]
pub struct RelationshipCountModule {
    id: String,
    prefix: String,
    config: RelationshipCountConfig,
    active: Arc<AtomicBool>,
}

impl Default for RelationshipCountModule {
    fn default() -> Self {
        Self::with_valid_id(Self::DEFAULT_ID, RelationshipCountConfig::default())
    }
}

impl RelationshipCountModule {
    pub const DEFAULT_ID: &'static str = "FRC";

    /// Module keeping ledgers under `_GA_<id>_`.
    ///
    /// `id` must be non-empty ASCII alphanumeric, so no namespace is a
    /// prefix of another.
    pub fn new(id: impl Into<String>, config: RelationshipCountConfig) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::IllegalValue(format!(
                "module id must be non-empty and alphanumeric, got {id:?}"
            )));
        }
        Ok(Self::with_valid_id(id, config))
    }

    fn with_valid_id(id: impl Into<String>, config: RelationshipCountConfig) -> Self {
        let id = id.into();
        Self {
            prefix: format!("{NAMESPACE}{id}_"),
            id,
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Prefix of every ledger key this module writes.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn config(&self) -> &RelationshipCountConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Deliver `backend`'s commits to this module. Commits are ignored until
    /// the module is started.
    pub fn register<B: StorageBackend>(&self, backend: &B) {
        backend.register_listener(Arc::new(self.clone()));
    }

    /// Start maintaining ledgers as they are. Use `initialize` when the graph
    /// already holds relationships the ledgers do not reflect.
    pub fn start(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            info!(module = %self.id, "relcount.module.started");
        }
    }

    pub fn shutdown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            info!(module = %self.id, "relcount.module.stopped");
        }
    }

    /// Build every ledger from the graph, then start.
    pub fn initialize(&self, graph: &dyn GraphAccess) -> Result<()> {
        self.rebuild(graph)?;
        self.start();
        Ok(())
    }

    /// Shut down, erase every key of the namespace, and initialize again.
    /// Recovers from ledgers that no longer decode.
    pub fn reinitialize(&self, graph: &dyn GraphAccess) -> Result<()> {
        self.shutdown();
        let removed = self.erase(graph)?;
        info!(module = %self.id, removed, "relcount.module.erased");
        self.initialize(graph)
    }

    fn erase(&self, graph: &dyn GraphAccess) -> Result<usize> {
        let mut removed = 0;
        for node in graph.all_node_ids()? {
            for (key, _) in graph.ledger_entries(node, &self.prefix)? {
                graph.remove_ledger_entry(node, &key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Re-derive every ledger from the current relationships, from empty.
    /// Returns the number of nodes whose ledger changed.
    ///
    /// Each node's ledger is flushed as soon as it is built. A failure leaves
    /// the nodes already visited rebuilt.
    pub fn rebuild(&self, graph: &dyn GraphAccess) -> Result<usize> {
        let compaction = self.config.compaction();
        let (mut written, mut relationships) = (0usize, 0usize);

        for id in graph.all_node_ids()? {
            let mut ledger = DegreeCachingNode::load(graph, id, &self.prefix)?;
            ledger.clear();
            for relationship in graph.incident_relationships(id)? {
                if !self.config.includes(&relationship) {
                    continue;
                }
                let weight = self.config.weigh(&relationship, id);
                for direction in relationship.directions_from(id)? {
                    ledger.increment(self.config.literal_signature(&relationship, direction), weight, compaction)?;
                }
                relationships += 1;
            }
            if ledger.flush(graph)? > 0 {
                written += 1;
            }
        }

        info!(module = %self.id, nodes = written, relationships, "relcount.module.rebuilt");
        Ok(written)
    }

    // ========================================================================
    // Counters
    // ========================================================================

    pub fn naive_counter(&self) -> NaiveCounter {
        NaiveCounter::new(self.config.clone())
    }

    pub fn cached_counter(&self) -> CachedCounter {
        CachedCounter::new(self.prefix.clone(), Arc::clone(&self.active))
    }

    pub fn fallback_counter(&self) -> FallbackCounter {
        FallbackCounter::new(self.cached_counter(), self.naive_counter())
    }

    // ========================================================================
    // Change feed
    // ========================================================================

    /// `(node, direction)` for both ends. A self-relationship is seen by
    /// its node once outgoing and once incoming.
    fn endpoints(relationship: &Relationship) -> SmallVec<[(NodeId, Direction); 2]> {
        smallvec![
            (relationship.src, Direction::Outgoing),
            (relationship.dst, Direction::Incoming),
        ]
    }

    fn apply(&self, graph: &dyn GraphAccess, data: &TransactionData) -> Result<usize> {
        let config = &self.config;
        let compaction = config.compaction();
        let mut batch = LedgerBatch::new(graph, self.prefix.clone());

        for relationship in data.created_relationships.iter().filter(|r| config.includes(r)) {
            for (node, direction) in Self::endpoints(relationship) {
                let signature = config.literal_signature(relationship, direction);
                let weight = config.weigh(relationship, node);
                batch.node(node)?.increment(signature, weight, compaction)?;
            }
        }

        for relationship in data.deleted_relationships.iter().filter(|r| config.includes(r)) {
            for (node, direction) in Self::endpoints(relationship) {
                if data.has_been_deleted(node) {
                    continue;
                }
                let signature = config.literal_signature(relationship, direction);
                let weight = config.weigh(relationship, node);
                batch.node(node)?.decrement(&signature, weight);
            }
        }

        for change in &data.changed_relationships {
            let (previous, current) = (&change.previous, &change.current);
            let (was_included, is_included) = (config.includes(previous), config.includes(current));
            for (node, direction) in Self::endpoints(current) {
                match (was_included, is_included) {
                    (true, true) => {
                        let before = config.literal_signature(previous, direction);
                        let after = config.literal_signature(current, direction);
                        let (before_weight, after_weight) = (config.weigh(previous, node), config.weigh(current, node));
                        batch.node(node)?.change(&before, before_weight, after, after_weight, compaction)?;
                    }
                    (true, false) => {
                        let before = config.literal_signature(previous, direction);
                        batch.node(node)?.decrement(&before, config.weigh(previous, node));
                    }
                    (false, true) => {
                        let after = config.literal_signature(current, direction);
                        batch.node(node)?.increment(after, config.weigh(current, node), compaction)?;
                    }
                    (false, false) => {}
                }
            }
        }

        batch.flush()
    }
}

impl TransactionListener for RelationshipCountModule {
    fn before_commit(&self, graph: &dyn GraphAccess, data: &TransactionData) -> Result<()> {
        if !self.is_active() || data.is_empty() {
            return Ok(());
        }
        let nodes = self.apply(graph, data)?;
        debug!(
            module = %self.id,
            created = data.created_relationships.len(),
            changed = data.changed_relationships.len(),
            deleted = data.deleted_relationships.len(),
            nodes,
            "relcount.module.applied"
        );
        Ok(())
    }
}
