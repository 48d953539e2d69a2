//! End-to-end tests for relationship counting.
//!
//! Each test drives a `MemoryBackend` through transactions while a
//! `RelationshipCountModule` maintains ledgers, then counts with the cached,
//! naive and fallback counters.

use std::sync::Arc;

use neo4j_relcount::storage::memory::MemoryTx;
use neo4j_relcount::{
    codec, props, Direction, Error, GraphAccess, MemoryBackend, NodeId, PropertyMap, RelId,
    RelationshipCountConfig, RelationshipCountModule, RelationshipCounter, RelationshipSignature,
    RelcountSettings, Result, StorageBackend, TransactionData, TransactionListener, TxMode, Value,
};
use pretty_assertions::assert_eq;

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    db: MemoryBackend,
    module: RelationshipCountModule,
    nodes: Vec<NodeId>,
}

impl Fixture {
    /// Ten nodes, a started module with threshold 5.
    fn new() -> Self {
        let config = RelationshipCountConfig::default().with_threshold(5).unwrap();
        Self::with_module(RelationshipCountModule::new("FRC", config).unwrap())
    }

    fn with_module(module: RelationshipCountModule) -> Self {
        let db = MemoryBackend::new();
        module.register(&db);
        module.start();

        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();
        let nodes = (1..=10)
            .map(|i| db.create_node(&mut tx, &[], props([("name", format!("node {i}"))])).unwrap())
            .collect();
        db.commit_tx(tx).unwrap();
        Self { db, module, nodes }
    }

    /// Node `n`, numbered from 1.
    fn node(&self, n: usize) -> NodeId {
        self.nodes[n - 1]
    }

    fn write<T>(&self, f: impl FnOnce(&MemoryBackend, &mut MemoryTx) -> T) -> T {
        let mut tx = self.db.begin_tx(TxMode::ReadWrite).unwrap();
        let out = f(&self.db, &mut tx);
        self.db.commit_tx(tx).unwrap();
        out
    }

    fn relate(&self, from: usize, to: usize, properties: PropertyMap) -> RelId {
        let (src, dst) = (self.node(from), self.node(to));
        self.write(|db, tx| db.create_relationship(tx, src, dst, "test", properties).unwrap())
    }

    /// 1 -> 2 {key1: value1}, 1 -> 3 {key1: value2}, 1 -> 4, 1 -> 5 {key1: value2},
    /// 6 -> 1 {key2: value1}, all in one transaction.
    fn create_first_relationships(&self) -> Vec<RelId> {
        let n = |i| self.node(i);
        self.write(|db, tx| {
            vec![
                db.create_relationship(tx, n(1), n(2), "test", props([("key1", "value1")])).unwrap(),
                db.create_relationship(tx, n(1), n(3), "test", props([("key1", "value2")])).unwrap(),
                db.create_relationship(tx, n(1), n(4), "test", PropertyMap::new()).unwrap(),
                db.create_relationship(tx, n(1), n(5), "test", props([("key1", "value2")])).unwrap(),
                db.create_relationship(tx, n(6), n(1), "test", props([("key2", "value1")])).unwrap(),
            ]
        })
    }

    /// 1 -> 7..=10 with key1 value3..=value6.
    fn create_second_relationships(&self) {
        let n = |i| self.node(i);
        self.write(|db, tx| {
            for (to, value) in [(7, "value3"), (8, "value4"), (9, "value5"), (10, "value6")] {
                db.create_relationship(tx, n(1), n(to), "test", props([("key1", value)])).unwrap();
            }
        });
    }

    fn cached(&self, query: &RelationshipSignature, n: usize) -> Result<u64> {
        self.module.cached_counter().count(&self.db, self.node(n), query)
    }

    fn naive(&self, query: &RelationshipSignature, n: usize) -> u64 {
        self.module.naive_counter().count(&self.db, self.node(n), query).unwrap()
    }

    fn fallback(&self, query: &RelationshipSignature, n: usize) -> u64 {
        self.module.fallback_counter().count(&self.db, self.node(n), query).unwrap()
    }
}

fn outgoing() -> RelationshipSignature {
    RelationshipSignature::wildcard("test", Direction::Outgoing)
}

fn incoming() -> RelationshipSignature {
    RelationshipSignature::wildcard("test", Direction::Incoming)
}

fn key1(value: &str) -> RelationshipSignature {
    outgoing().with_value("key1", value).unwrap()
}

fn assert_unable(result: Result<u64>) {
    assert!(matches!(result, Err(Error::UnableToCount(_))), "expected UnableToCount, got {result:?}");
}

// ============================================================================
// 1. Below and above the compaction threshold
// ============================================================================

#[test]
fn test_no_relationships() {
    let f = Fixture::new();
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 0);
    assert_eq!(f.cached(&RelationshipSignature::literal("test", Direction::Outgoing), 1).unwrap(), 0);
}

#[test]
fn test_below_threshold_counted_one_by_one() {
    let f = Fixture::new();
    f.create_first_relationships();

    assert_eq!(f.cached(&key1("value1"), 1).unwrap(), 1);
    assert_eq!(f.cached(&key1("value2"), 1).unwrap(), 2);
    assert_eq!(f.cached(&key1("value3"), 1).unwrap(), 0);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 4);
    assert_eq!(f.cached(&incoming(), 1).unwrap(), 1);
    assert_eq!(f.cached(&incoming().with_value("key2", "value1").unwrap(), 1).unwrap(), 1);

    for query in [key1("value1"), key1("value2"), key1("value3"), outgoing(), incoming()] {
        assert_eq!(f.cached(&query, 1).unwrap(), f.naive(&query, 1), "{query}");
    }

    let literal = RelationshipSignature::literal("test", Direction::Outgoing);
    assert_eq!(f.cached(&literal, 1).unwrap(), 1);
    assert_eq!(f.cached(&literal.with_value("key1", "value2").unwrap(), 1).unwrap(), 2);
}

#[test]
fn test_above_threshold_not_countable_one_by_one() {
    let f = Fixture::new();
    f.create_first_relationships();
    f.create_second_relationships();

    assert_unable(f.cached(&key1("value1"), 1));
    assert_unable(f.cached(&key1("value2"), 1));
    assert_unable(f.cached(&key1("value3"), 1));
    let literal = RelationshipSignature::literal("test", Direction::Outgoing).with_value("key1", "value1").unwrap();
    assert_unable(f.cached(&literal, 1));

    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 8);
    assert_eq!(f.cached(&incoming(), 1).unwrap(), 1);

    assert_eq!(f.fallback(&key1("value1"), 1), 1);
    assert_eq!(f.fallback(&key1("value2"), 1), 2);
    assert_eq!(f.fallback(&key1("value3"), 1), 1);
    assert_eq!(f.fallback(&literal, 1), 1);
    assert_eq!(f.fallback(&outgoing(), 1), 8);
}

// ============================================================================
// 2. Deletion
// ============================================================================

#[test]
fn test_deleting_relationship_decrements() {
    let f = Fixture::new();
    let rels = f.create_first_relationships();
    f.write(|db, tx| assert!(db.delete_relationship(tx, rels[0]).unwrap()));

    assert_eq!(f.cached(&key1("value1"), 1).unwrap(), 0);
    assert_eq!(f.cached(&key1("value2"), 1).unwrap(), 2);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 3);
    assert_eq!(f.cached(&incoming(), 1).unwrap(), 1);
    assert_eq!(f.cached(&incoming(), 2).unwrap(), 0);
}

#[test]
fn test_deleting_after_compaction() {
    let f = Fixture::new();
    let rels = f.create_first_relationships();
    f.create_second_relationships();
    f.write(|db, tx| assert!(db.delete_relationship(tx, rels[0]).unwrap()));

    assert_unable(f.cached(&key1("value1"), 1));
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 7);
    assert_eq!(f.cached(&incoming(), 1).unwrap(), 1);
    assert_eq!(f.fallback(&key1("value1"), 1), 0);
}

#[test]
fn test_deleting_below_zero_does_no_harm() {
    let f = Fixture::new();
    let rels = f.create_first_relationships();

    let key = codec::encode_key(
        f.module.prefix(),
        &RelationshipSignature::literal("test", Direction::Outgoing).with_value("key1", "value1").unwrap(),
    );
    let node1 = f.node(1);
    f.write(|db, tx| db.set_node_property(tx, node1, &key, Value::Int(0)).unwrap());
    f.write(|db, tx| assert!(db.delete_relationship(tx, rels[0]).unwrap()));

    assert_eq!(f.cached(&key1("value1"), 1).unwrap(), 0);
    assert_eq!(f.cached(&key1("value2"), 1).unwrap(), 2);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 3);
    assert!(f.db.ledger_entries(node1, f.module.prefix()).unwrap().iter().all(|(k, _)| k != &key));
}

#[test]
fn test_deleting_missing_bucket_does_no_harm() {
    let f = Fixture::new();
    f.create_first_relationships();

    let (node2, node10) = (f.node(2), f.node(10));
    let rel = f.write(|db, tx| db.create_relationship(tx, node2, node10, "test2", props([("key1", "value3")])).unwrap());
    let key = codec::encode_key(
        f.module.prefix(),
        &RelationshipSignature::literal("test2", Direction::Outgoing).with_value("key1", "value3").unwrap(),
    );
    f.write(|db, tx| db.remove_node_property(tx, node2, &key).unwrap());
    f.write(|db, tx| assert!(db.delete_relationship(tx, rel).unwrap()));

    assert_eq!(f.cached(&key1("value1"), 1).unwrap(), 1);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 4);
    assert_eq!(f.cached(&RelationshipSignature::wildcard("test2", Direction::Incoming), 10).unwrap(), 0);
}

#[test]
fn test_deleting_node_with_all_relationships() {
    let f = Fixture::new();
    f.create_first_relationships();
    f.create_second_relationships();

    assert_eq!(f.cached(&incoming(), 2).unwrap(), 1);
    assert_eq!(f.cached(&incoming(), 3).unwrap(), 1);
    assert_eq!(f.cached(&outgoing(), 6).unwrap(), 1);

    let node1 = f.node(1);
    f.write(|db, tx| assert!(db.detach_delete_node(tx, node1).unwrap()));

    assert_eq!(f.cached(&incoming(), 2).unwrap(), 0);
    assert_eq!(f.cached(&incoming(), 3).unwrap(), 0);
    assert_eq!(f.cached(&outgoing(), 6).unwrap(), 0);
    assert!(f.db.ledger_entries(f.node(6), f.module.prefix()).unwrap().is_empty());
}

// ============================================================================
// 3. Changes
// ============================================================================

#[test]
fn test_change_without_actual_change() {
    let f = Fixture::new();
    let rels = f.create_first_relationships();
    f.write(|db, tx| db.set_relationship_property(tx, rels[1], "key1", Value::from("value2")).unwrap());

    assert_eq!(f.cached(&key1("value1"), 1).unwrap(), 1);
    assert_eq!(f.cached(&key1("value2"), 1).unwrap(), 2);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 4);
}

#[test]
fn test_change_before_compaction() {
    let f = Fixture::new();
    let rels = f.create_first_relationships();
    f.write(|db, tx| db.set_relationship_property(tx, rels[1], "key1", Value::from("value1")).unwrap());

    assert_eq!(f.cached(&key1("value1"), 1).unwrap(), 2);
    assert_eq!(f.cached(&key1("value2"), 1).unwrap(), 1);
    assert_eq!(f.cached(&key1("value3"), 1).unwrap(), 0);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 4);
    assert_eq!(f.cached(&incoming(), 3).unwrap(), 1);
    assert_eq!(f.cached(&incoming().with_value("key1", "value1").unwrap(), 3).unwrap(), 1);
}

#[test]
fn test_change_after_compaction() {
    let f = Fixture::new();
    let rels = f.create_first_relationships();
    f.create_second_relationships();
    f.write(|db, tx| {
        db.set_relationship_property(tx, rels[1], "key1", Value::from("value1")).unwrap();
        db.remove_relationship_property(tx, rels[3], "key1").unwrap();
    });

    assert_unable(f.cached(&key1("value1"), 1));
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 8);
    assert_eq!(f.fallback(&key1("value1"), 1), 2);
    assert_eq!(f.fallback(&key1("value2"), 1), 0);
}

// ============================================================================
// 4. Weights, namespaces, transactions
// ============================================================================

#[test]
fn test_weighted_counting() {
    let settings = RelcountSettings::from_json(r#"{ "threshold": 5, "weight_property": "weight" }"#).unwrap();
    let f = Fixture::with_module(settings.into_module().unwrap());

    f.write(|db, tx| {
        let (a, b, c) = (f.node(1), f.node(2), f.node(3));
        db.create_relationship(tx, a, b, "test", props([("key1", Value::from("value1")), ("weight", Value::from(2))])).unwrap();
        db.create_relationship(tx, a, c, "test", props([("key1", Value::from("value1")), ("weight", Value::from(3))])).unwrap();
        db.create_relationship(tx, a, c, "test", props([("key1", "value2")])).unwrap();
        db.create_relationship(tx, a, b, "test", props([("weight", 5)])).unwrap();
    });

    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 2 + 3 + 1 + 5);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), f.naive(&outgoing(), 1));
    assert_eq!(f.cached(&key1("value1"), 1).unwrap(), 5);
    assert_eq!(f.cached(&incoming(), 2).unwrap(), 7);

    // the weight itself is not part of any signature
    assert_eq!(f.db.ledger_entries(f.node(1), f.module.prefix()).unwrap().len(), 3);
}

#[test]
fn test_modules_keep_separate_ledgers() {
    let m1 = RelcountSettings::from_json(r#"{ "id": "M1" }"#).unwrap().into_module().unwrap();
    let m2 = RelcountSettings::from_json(r#"{ "id": "M2", "excluded_relationship_types": ["test"] }"#)
        .unwrap()
        .into_module()
        .unwrap();
    let f = Fixture::with_module(m1.clone());
    m2.register(&f.db);
    m2.start();

    f.create_first_relationships();
    let node1 = f.node(1);
    assert_eq!(f.db.ledger_entries(node1, "_GA_M1_").unwrap().len(), 4);
    assert!(f.db.ledger_entries(node1, "_GA_M2_").unwrap().is_empty());

    let node2 = f.node(2);
    f.write(|db, tx| db.create_relationship(tx, node1, node2, "other", PropertyMap::new()).unwrap());
    let m2_before = f.db.ledger_entries(node1, "_GA_M2_").unwrap();
    assert_eq!(m2_before, vec![("_GA_M2_other#OUTGOING#".to_owned(), Value::Int(1))]);

    f.create_second_relationships();
    assert_eq!(f.db.ledger_entries(node1, "_GA_M2_").unwrap(), m2_before);

    let other = RelationshipSignature::wildcard("other", Direction::Outgoing);
    assert_eq!(m1.cached_counter().count(&f.db, node1, &other).unwrap(), 1);
    assert_eq!(m2.cached_counter().count(&f.db, node1, &other).unwrap(), 1);
    assert_eq!(m1.cached_counter().count(&f.db, node1, &outgoing()).unwrap(), 8);
    assert_eq!(m2.cached_counter().count(&f.db, node1, &outgoing()).unwrap(), 0);
}

#[test]
fn test_rolled_back_transaction_leaves_ledger_alone() {
    let f = Fixture::new();
    f.create_first_relationships();
    let before = f.db.ledger_entries(f.node(1), f.module.prefix()).unwrap();

    let (a, b) = (f.node(1), f.node(2));
    let mut tx = f.db.begin_tx(TxMode::ReadWrite).unwrap();
    f.db.create_relationship(&mut tx, a, b, "test", props([("key1", "value9")])).unwrap();
    f.db.rollback_tx(tx).unwrap();

    assert_eq!(f.db.ledger_entries(a, f.module.prefix()).unwrap(), before);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 4);
}

struct Veto;

impl TransactionListener for Veto {
    fn before_commit(&self, _graph: &dyn GraphAccess, data: &TransactionData) -> Result<()> {
        if data.created_relationships.iter().any(|r| r.rel_type == "forbidden") {
            return Err(Error::ConstraintViolation("forbidden relationship".into()));
        }
        Ok(())
    }
}

#[test]
fn test_failed_commit_rolls_back_ledger_writes() {
    let f = Fixture::new();
    f.db.register_listener(Arc::new(Veto));
    f.create_first_relationships();

    let (a, b) = (f.node(1), f.node(2));
    let mut tx = f.db.begin_tx(TxMode::ReadWrite).unwrap();
    f.db.create_relationship(&mut tx, a, b, "test", PropertyMap::new()).unwrap();
    f.db.create_relationship(&mut tx, a, b, "forbidden", PropertyMap::new()).unwrap();
    assert!(matches!(f.db.commit_tx(tx), Err(Error::ConstraintViolation(_))));

    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 4);
    assert_eq!(f.cached(&RelationshipSignature::wildcard("forbidden", Direction::Outgoing), 1).unwrap(), 0);
    assert_eq!(f.naive(&outgoing(), 1), 4);
}

// ============================================================================
// 5. Batch loading and rebuilding
// ============================================================================

#[test]
fn test_batch_then_rebuild_agree_on_totals() {
    let f = Fixture::new();
    let (hub, leaf) = (f.node(1), f.node(2));
    let rels = (0..30)
        .map(|i| (hub, leaf, "test".to_owned(), props([("key1", Value::Int(i % 7)), ("key2", Value::Int(i % 3))])))
        .collect();
    f.write(|db, tx| assert_eq!(db.create_relationships_batch(tx, rels).unwrap().len(), 30));

    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 30);
    assert_eq!(f.cached(&incoming(), 2).unwrap(), 30);
    assert!(f.db.ledger_entries(hub, f.module.prefix()).unwrap().len() <= 5);

    f.module.reinitialize(&f.db).unwrap();
    assert!(f.module.is_active());
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 30);
    assert_eq!(f.cached(&incoming(), 2).unwrap(), 30);

    let query = outgoing().with_value("key1", 3).unwrap();
    assert_eq!(f.fallback(&query, 1), f.naive(&query, 1));
    assert_eq!(f.naive(&query, 1), 4);
}

#[test]
fn test_initialize_existing_graph() {
    let f = Fixture::new();
    f.module.shutdown();
    f.create_first_relationships();
    assert!(f.db.ledger_entries(f.node(1), f.module.prefix()).unwrap().is_empty());
    assert!(matches!(f.cached(&outgoing(), 1), Err(Error::EngineInactive(_))));

    f.module.initialize(&f.db).unwrap();
    assert_eq!(f.cached(&key1("value2"), 1).unwrap(), 2);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 4);
    assert_eq!(f.cached(&incoming(), 1).unwrap(), 1);
}

#[test]
fn test_self_relationship_counted_on_both_sides() {
    let f = Fixture::new();
    f.relate(1, 1, props([("key1", "value1")]));

    let both = RelationshipSignature::wildcard("test", Direction::Both);
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), 1);
    assert_eq!(f.cached(&incoming(), 1).unwrap(), 1);
    assert_eq!(f.cached(&both, 1).unwrap(), 2);
    assert_eq!(f.naive(&both, 1), 2);
}

// ============================================================================
// 6. Unusual property values, overflow, unknown nodes
// ============================================================================

#[test]
fn test_values_without_predicate_do_not_block_counting() {
    let f = Fixture::new();
    f.relate(1, 1, props([("tags", Value::List(vec![Value::Null]))]));
    let meta = Value::Map(props([("since", 2020)]));
    f.relate(1, 2, props([("key1", Value::from("value1")), ("meta", meta)]));

    let both = RelationshipSignature::wildcard("test", Direction::Both);
    assert_eq!(f.cached(&both, 1).unwrap(), 3);
    assert_eq!(f.cached(&key1("value1"), 1).unwrap(), 1);
    assert_eq!(f.fallback(&both, 1), f.naive(&both, 1));

    f.module.reinitialize(&f.db).unwrap();
    assert_eq!(f.cached(&both, 1).unwrap(), 3);
    assert_eq!(f.cached(&incoming(), 2).unwrap(), 1);
}

#[test]
fn test_count_overflow_fails_the_commit() {
    let settings = RelcountSettings::from_json(r#"{ "weight_property": "weight" }"#).unwrap();
    let f = Fixture::with_module(settings.into_module().unwrap());
    f.relate(1, 2, props([("weight", i64::MAX)]));

    let (a, c) = (f.node(1), f.node(3));
    let mut tx = f.db.begin_tx(TxMode::ReadWrite).unwrap();
    f.db.create_relationship(&mut tx, a, c, "test", props([("weight", 5)])).unwrap();
    assert!(matches!(f.db.commit_tx(tx), Err(Error::CountOverflow(_))));

    let max = i64::MAX as u64;
    assert_eq!(f.cached(&outgoing(), 1).unwrap(), max);
    assert_eq!(f.naive(&outgoing(), 1), max);
    assert_eq!(f.naive(&incoming(), 3), 0);
}

#[test]
fn test_unknown_node_counts_zero() {
    let f = Fixture::new();
    f.create_first_relationships();

    let ghost = NodeId(777);
    assert_eq!(f.module.fallback_counter().count(&f.db, ghost, &outgoing()).unwrap(), 0);
    assert_eq!(f.module.naive_counter().count(&f.db, ghost, &outgoing()).unwrap(), 0);
}
