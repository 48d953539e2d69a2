//! # Relationship Count Ledger
//!
//! Per node, the ledger holds buckets `(signature, count)` grouped by
//! `(relationship type, direction)`. Buckets of a group are pairwise mutually
//! exclusive, so every relationship is counted in exactly one of them, and
//! their counts always sum to the group's true (weighted) degree.
//!
//! [`DegreeCachingNode`] is the in-memory form of one node's ledger. It is
//! loaded from node properties, mutated by increment / decrement / change,
//! and flushed back, writing only the keys that changed.

pub mod batch;

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::codec;
use crate::compact::CompactionStrategy;
use crate::model::{Direction, NodeId, Value};
use crate::signature::RelationshipSignature;
use crate::storage::GraphAccess;
use crate::{Error, Result};

pub use batch::LedgerBatch;

/// Largest total a group may hold: counts are persisted as `Value::Int`.
pub const MAX_COUNT: u64 = i64::MAX as u64;

// ============================================================================
// Bucket and Group
// ============================================================================

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub signature: RelationshipSignature,
    pub count: u64,
}

/// Buckets of one `(type, direction)` on one node, keyed by encoded signature.
#[derive(Debug, Clone)]
pub struct Group {
    rel_type: String,
    direction: Direction,
    buckets: BTreeMap<String, Bucket>,
}

impl Group {
    pub fn new(rel_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            rel_type: rel_type.into(),
            direction,
            buckets: BTreeMap::new(),
        }
    }

    pub fn rel_type(&self) -> &str {
        &self.rel_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Sum of all bucket counts.
    pub fn total(&self) -> u64 {
        self.buckets.values().map(|b| b.count).sum()
    }

    /// Buckets in key order.
    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    /// Has any bucket been generalized?
    pub fn is_compacted(&self) -> bool {
        self.buckets.values().any(|b| b.signature.is_generalized())
    }

    /// The bucket whose signature equals `signature` exactly.
    pub fn exact(&self, signature: &RelationshipSignature) -> Option<&Bucket> {
        self.buckets.get(&codec::encode_signature(signature))
    }

    /// Key of the first bucket, in key order, more general than or equal to
    /// `signature`.
    fn covering_key(&self, signature: &RelationshipSignature) -> Option<String> {
        let key = codec::encode_signature(signature);
        if self.buckets.contains_key(&key) {
            return Some(key);
        }
        self.buckets
            .iter()
            .find(|(_, b)| b.signature.is_more_general_than(signature))
            .map(|(k, _)| k.clone())
    }

    /// Add `count` to the bucket keyed by `signature`, creating it if needed.
    fn add(&mut self, signature: RelationshipSignature, count: u64) {
        let key = codec::encode_signature(&signature);
        self.buckets
            .entry(key)
            .and_modify(|b| b.count += count)
            .or_insert(Bucket { signature, count });
    }

    /// Replace every bucket overlapping `generalization` by a single bucket
    /// holding their summed count.
    ///
    /// `generalization` is widened (differing keys relaxed to `Any`) until it
    /// covers every bucket it is not mutually exclusive with, so the
    /// remaining buckets stay pairwise exclusive. Returns the number of
    /// buckets absorbed.
    pub fn merge(&mut self, mut generalization: RelationshipSignature) -> usize {
        loop {
            let widen = self.buckets.values().find(|b| {
                !generalization.is_mutually_exclusive(&b.signature)
                    && !generalization.is_more_general_than(&b.signature)
            });
            match widen {
                Some(bucket) => {
                    let keys = generalization.differing_keys(&bucket.signature);
                    generalization = generalization.generalize(&keys);
                }
                None => break,
            }
        }

        let absorbed: Vec<String> = self
            .buckets
            .iter()
            .filter(|(_, b)| generalization.is_more_general_than(&b.signature))
            .map(|(k, _)| k.clone())
            .collect();
        let count = absorbed.iter().filter_map(|k| self.buckets.remove(k)).map(|b| b.count).sum();
        self.add(generalization, count);
        absorbed.len()
    }
}

// ============================================================================
// DegreeCachingNode
// ============================================================================

/// One node's ledger, in memory.
#[derive(Debug, Clone)]
pub struct DegreeCachingNode {
    id: NodeId,
    prefix: String,
    groups: BTreeMap<(String, Direction), Group>,
    /// Ledger as last read from / written to the node.
    persisted: HashMap<String, u64>,
}

impl DegreeCachingNode {
    /// Empty ledger that has never been persisted.
    pub fn new(id: NodeId, prefix: impl Into<String>) -> Self {
        Self {
            id,
            prefix: prefix.into(),
            groups: BTreeMap::new(),
            persisted: HashMap::new(),
        }
    }

    /// Read the ledger of `id` from its properties under `prefix`.
    pub fn load(graph: &dyn GraphAccess, id: NodeId, prefix: &str) -> Result<Self> {
        let mut node = Self::new(id, prefix);
        for (key, value) in graph.ledger_entries(id, prefix)? {
            let signature = codec::decode_key(prefix, &key)?;
            let count = match value {
                Value::Int(c) if c >= 0 => c as u64,
                other => {
                    return Err(Error::InvalidLedgerKey {
                        key,
                        message: format!("count must be a non-negative integer, got {other}"),
                    });
                }
            };
            let group = node.group_mut(signature.rel_type(), signature.direction());
            if group.total().checked_add(count).is_none_or(|total| total > MAX_COUNT) {
                return Err(Error::InvalidLedgerKey {
                    key,
                    message: format!("group total exceeds {MAX_COUNT}"),
                });
            }
            group.add(signature, count);
            node.persisted.insert(key, count);
        }
        Ok(node)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn group(&self, rel_type: &str, direction: Direction) -> Option<&Group> {
        self.groups.get(&(rel_type.to_owned(), direction))
    }

    fn group_mut(&mut self, rel_type: &str, direction: Direction) -> &mut Group {
        self.groups
            .entry((rel_type.to_owned(), direction))
            .or_insert_with(|| Group::new(rel_type, direction))
    }

    /// Sum of all buckets of one group.
    pub fn total(&self, rel_type: &str, direction: Direction) -> u64 {
        self.group(rel_type, direction).map_or(0, Group::total)
    }

    /// Drop every bucket. The next flush removes them from the node.
    pub fn clear(&mut self) {
        self.groups.clear();
    }

    /// Is the in-memory ledger different from what was last persisted?
    pub fn is_dirty(&self) -> bool {
        let current = self.snapshot();
        current != self.persisted
    }

    fn snapshot(&self) -> HashMap<String, u64> {
        self.groups
            .values()
            .flat_map(|g| g.buckets())
            .map(|b| (codec::encode_key(&self.prefix, &b.signature), b.count))
            .collect()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Count `weight` more relationships described by the literal `signature`.
    ///
    /// Fails with [`Error::CountOverflow`], leaving the ledger untouched, when
    /// the group total would exceed [`MAX_COUNT`].
    pub fn increment(
        &mut self,
        signature: RelationshipSignature,
        weight: u64,
        compaction: &dyn CompactionStrategy,
    ) -> Result<()> {
        if weight == 0 {
            return Ok(());
        }
        let id = self.id;
        let total = self.total(signature.rel_type(), signature.direction());
        if total.checked_add(weight).is_none_or(|t| t > MAX_COUNT) {
            return Err(Error::CountOverflow(format!(
                "node {id}: {} {} holds {total}, cannot add {weight}",
                signature.rel_type(),
                signature.direction()
            )));
        }

        let group = self.group_mut(signature.rel_type(), signature.direction());
        match group.covering_key(&signature) {
            Some(key) => {
                if let Some(bucket) = group.buckets.get_mut(&key) {
                    bucket.count += weight;
                }
            }
            None => {
                group.add(signature, weight);
                compaction.compact(id, group);
            }
        }
        Ok(())
    }

    /// Count `weight` fewer relationships described by the literal `signature`.
    ///
    /// Never goes below zero; an emptied bucket is removed.
    pub fn decrement(&mut self, signature: &RelationshipSignature, weight: u64) {
        if weight == 0 {
            return;
        }
        let key = (signature.rel_type().to_owned(), signature.direction());
        let Some(group) = self.groups.get_mut(&key) else {
            warn!(node = self.id.0, signature = %signature, "relcount.ledger.missing_bucket");
            return;
        };
        let Some(bucket_key) = group.covering_key(signature) else {
            warn!(node = self.id.0, signature = %signature, "relcount.ledger.missing_bucket");
            return;
        };
        if let Some(bucket) = group.buckets.get_mut(&bucket_key) {
            if bucket.count < weight {
                warn!(node = self.id.0, bucket = %bucket_key, count = bucket.count, weight, "relcount.ledger.underflow");
            }
            bucket.count = bucket.count.saturating_sub(weight);
            if bucket.count == 0 {
                group.buckets.remove(&bucket_key);
            }
        }
        if group.is_empty() {
            self.groups.remove(&key);
        }
    }

    /// Move a changed relationship from `previous` to `current`.
    ///
    /// A no-op when both resolve to the same bucket with the same weight.
    pub fn change(
        &mut self,
        previous: &RelationshipSignature,
        previous_weight: u64,
        current: RelationshipSignature,
        current_weight: u64,
        compaction: &dyn CompactionStrategy,
    ) -> Result<()> {
        if previous_weight == current_weight {
            if let Some(group) = self.group(previous.rel_type(), previous.direction()) {
                let before = group.covering_key(previous);
                if before.is_some() && before == group.covering_key(&current) {
                    return Ok(());
                }
            }
        }
        self.decrement(previous, previous_weight);
        self.increment(current, current_weight, compaction)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write changed buckets back to the node and remove emptied ones.
    /// Returns the number of keys written or removed.
    pub fn flush(&mut self, graph: &dyn GraphAccess) -> Result<usize> {
        let current = self.snapshot();
        let mut touched = 0;

        for (key, count) in &current {
            if self.persisted.get(key) != Some(count) {
                let count = i64::try_from(*count).map_err(|_| {
                    Error::CountOverflow(format!("node {}: bucket {key} holds {count}", self.id))
                })?;
                let value = Value::Int(count);
                graph.write_ledger_entry(self.id, key, value)?;
                touched += 1;
            }
        }
        for key in self.persisted.keys() {
            if !current.contains_key(key) {
                graph.remove_ledger_entry(self.id, key)?;
                touched += 1;
            }
        }

        if touched > 0 {
            debug!(node = self.id.0, touched, buckets = current.len(), "relcount.ledger.flushed");
        }
        self.persisted = current;
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact::ThresholdCompaction;
    use crate::predicate::ValuePredicate;
    use crate::storage::{MemoryBackend, StorageBackend};
    use crate::tx::TxMode;
    use crate::model::PropertyMap;
    use pretty_assertions::assert_eq;

    const PREFIX: &str = "_GA_FRC_";

    fn sig(value: impl Into<Value>) -> RelationshipSignature {
        RelationshipSignature::literal("T", Direction::Outgoing).with_value("k", value).unwrap()
    }

    fn compaction(threshold: usize) -> ThresholdCompaction {
        ThresholdCompaction::new(threshold).unwrap()
    }

    #[test]
    fn test_increment_and_decrement() {
        let strategy = compaction(5);
        let mut node = DegreeCachingNode::new(NodeId(1), PREFIX);
        node.increment(sig(1), 1, &strategy).unwrap();
        node.increment(sig(1), 2, &strategy).unwrap();
        node.increment(sig(2), 1, &strategy).unwrap();
        node.increment(sig(3), 0, &strategy).unwrap();

        let group = node.group("T", Direction::Outgoing).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.exact(&sig(1)).unwrap().count, 3);
        assert_eq!(node.total("T", Direction::Outgoing), 4);

        node.decrement(&sig(1), 3);
        node.decrement(&sig(2), 5);
        assert!(node.group("T", Direction::Outgoing).is_none());
        assert_eq!(node.total("T", Direction::Outgoing), 0);

        // missing bucket is tolerated
        node.decrement(&sig(9), 1);
    }

    #[test]
    fn test_increment_past_max_count_fails() {
        let strategy = compaction(5);
        let mut node = DegreeCachingNode::new(NodeId(1), PREFIX);
        node.increment(sig(1), MAX_COUNT, &strategy).unwrap();
        assert!(matches!(node.increment(sig(1), 1, &strategy), Err(Error::CountOverflow(_))));
        assert!(matches!(node.increment(sig(2), 5, &strategy), Err(Error::CountOverflow(_))));
        assert_eq!(node.total("T", Direction::Outgoing), MAX_COUNT);
        assert_eq!(node.group("T", Direction::Outgoing).unwrap().len(), 1);

        // other groups are independent
        let incoming = sig(1).with_direction(Direction::Incoming);
        node.increment(incoming, 5, &strategy).unwrap();
        assert_eq!(node.total("T", Direction::Incoming), 5);
    }

    #[test]
    fn test_compaction_keeps_total() {
        let strategy = compaction(4);
        let mut node = DegreeCachingNode::new(NodeId(1), PREFIX);
        for (i, value) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            node.increment(sig(value), i as u64 + 3, &strategy).unwrap();
        }

        let group = node.group("T", Direction::Outgoing).unwrap();
        assert_eq!(group.len(), 1);
        assert!(group.is_compacted());
        let bucket = group.buckets().next().unwrap();
        assert_eq!(bucket.count, 3 + 4 + 5 + 6 + 7);
        assert_eq!(bucket.signature.get("k"), &ValuePredicate::Any);

        // later relationships land in the generalized bucket
        node.increment(sig("z"), 1, &strategy).unwrap();
        assert_eq!(node.group("T", Direction::Outgoing).unwrap().len(), 1);
        assert_eq!(node.total("T", Direction::Outgoing), 26);
    }

    #[test]
    fn test_merge_widens_to_keep_buckets_disjoint() {
        let base = RelationshipSignature::literal("T", Direction::Outgoing);
        let a = base.clone().with_value("k1", 1).unwrap();
        let b = a.clone().with_value("k2", "x").unwrap();
        let c = base.clone().with_value("k1", 2).unwrap();
        let d = base.with_value("k1", 3).unwrap().with("k2", ValuePredicate::Any);

        let mut group = Group::new("T", Direction::Outgoing);
        group.add(a.clone(), 1);
        group.add(b.clone(), 2);
        group.add(c.clone(), 4);
        group.add(d, 8);

        // k1=Any overlaps `d` on k2, so it is widened to k1=Any, k2=Any
        let absorbed = group.merge(a.generalize(&a.differing_keys(&c)));
        assert_eq!(absorbed, 4);
        assert_eq!(group.len(), 1);
        assert_eq!(group.total(), 15);
        let merged = &group.buckets().next().unwrap().signature;
        assert!(merged.is_more_general_than(&b));
    }

    #[test]
    fn test_merge_leaves_exclusive_buckets_alone() {
        let base = RelationshipSignature::literal("T", Direction::Outgoing);
        let a = base.clone().with_value("k1", 1).unwrap();
        let b = a.clone().with_value("k2", "x").unwrap();
        let c = base.with_value("k1", 2).unwrap();

        let mut group = Group::new("T", Direction::Outgoing);
        group.add(a.clone(), 1);
        group.add(b.clone(), 2);
        group.add(c.clone(), 4);

        assert_eq!(group.merge(a.generalize(&a.differing_keys(&c))), 2);
        assert_eq!(group.len(), 2);
        assert_eq!(group.exact(&b).unwrap().count, 2);
        assert_eq!(group.total(), 7);
    }

    #[test]
    fn test_change_within_same_bucket_is_noop() {
        let strategy = compaction(1);
        let mut node = DegreeCachingNode::new(NodeId(1), PREFIX);
        node.increment(sig(1), 1, &strategy).unwrap();
        node.increment(sig(2), 1, &strategy).unwrap();
        let before = node.group("T", Direction::Outgoing).unwrap().buckets().cloned().collect::<Vec<_>>();

        node.change(&sig(1), 1, sig(3), 1, &strategy).unwrap();
        let after = node.group("T", Direction::Outgoing).unwrap().buckets().cloned().collect::<Vec<_>>();
        assert_eq!(before, after);

        node.change(&sig(1), 1, sig(3), 4, &strategy).unwrap();
        assert_eq!(node.total("T", Direction::Outgoing), 5);
    }

    #[test]
    fn test_flush_and_load() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();
        let id = db.create_node(&mut tx, &[], PropertyMap::new()).unwrap();
        db.set_node_property(&mut tx, id, "name", Value::from("not a ledger key")).unwrap();
        db.commit_tx(tx).unwrap();

        let strategy = compaction(5);
        let mut node = DegreeCachingNode::load(&db, id, PREFIX).unwrap();
        assert!(!node.is_dirty());
        node.increment(sig(1), 2, &strategy).unwrap();
        node.increment(sig("x"), 1, &strategy).unwrap();
        assert!(node.is_dirty());
        assert_eq!(node.flush(&db).unwrap(), 2);
        assert_eq!(node.flush(&db).unwrap(), 0);

        let mut reloaded = DegreeCachingNode::load(&db, id, PREFIX).unwrap();
        assert_eq!(reloaded.total("T", Direction::Outgoing), 3);
        assert_eq!(reloaded.group("T", Direction::Outgoing).unwrap().exact(&sig(1)).unwrap().count, 2);

        reloaded.decrement(&sig("x"), 1);
        assert_eq!(reloaded.flush(&db).unwrap(), 1);
        assert_eq!(db.ledger_entries(id, PREFIX).unwrap(), vec![("_GA_FRC_T#OUTGOING#k=i:1".to_owned(), Value::Int(2))]);
        assert_eq!(db.node(id).unwrap().unwrap().get("name"), Some(&Value::from("not a ledger key")));
    }

    #[test]
    fn test_load_rejects_corrupt_ledger() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();
        let id = db.create_node(&mut tx, &[], PropertyMap::new()).unwrap();
        db.set_node_property(&mut tx, id, "_GA_FRC_T#OUTGOING#", Value::from("three")).unwrap();
        db.commit_tx(tx).unwrap();

        assert!(matches!(
            DegreeCachingNode::load(&db, id, PREFIX),
            Err(Error::InvalidLedgerKey { .. })
        ));
    }

    #[test]
    fn test_load_rejects_group_total_past_max_count() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();
        let id = db.create_node(&mut tx, &[], PropertyMap::new()).unwrap();
        db.set_node_property(&mut tx, id, "_GA_FRC_T#OUTGOING#k=i:1", Value::Int(i64::MAX)).unwrap();
        db.set_node_property(&mut tx, id, "_GA_FRC_T#OUTGOING#k=i:2", Value::Int(1)).unwrap();
        db.commit_tx(tx).unwrap();

        assert!(matches!(
            DegreeCachingNode::load(&db, id, PREFIX),
            Err(Error::InvalidLedgerKey { .. })
        ));
    }
}
