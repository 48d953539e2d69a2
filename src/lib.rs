//! # neo4j-relcount: Relationship Count Cache for Property Graphs
//!
//! Keeps, on every node, a compact ledger of its incident relationships
//! grouped by type, direction and property values, so degree queries like
//! "how many OUTGOING `FRIEND_OF` with `level = 1`?" are answered from a few
//! buckets instead of a scan over all relationships.
//!
//! ## Design Principles
//!
//! 1. **Closed predicate algebra**: `ValuePredicate` is one sum type; generality
//!    and exclusivity are exhaustive matches
//! 2. **Ledger is plain node properties**: keys under `_GA_<id>_`, values are counts
//! 3. **Bounded by compaction**: groups never exceed a threshold; totals never change
//! 4. **Exact or nothing**: the cached counter raises `UnableToCount` rather
//!    than guess; the fallback counter recovers by traversal
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use neo4j_relcount::{
//!     Direction, MemoryBackend, PropertyMap, RelationshipCountModule, RelationshipCounter,
//!     RelationshipSignature, StorageBackend, TxMode,
//! };
//!
//! # fn example() -> neo4j_relcount::Result<()> {
//! let db = MemoryBackend::new();
//! let module = RelationshipCountModule::default();
//! module.register(&db);
//! module.start();
//!
//! let mut tx = db.begin_tx(TxMode::ReadWrite)?;
//! let a = db.create_node(&mut tx, &["Person"], PropertyMap::new())?;
//! let b = db.create_node(&mut tx, &["Person"], PropertyMap::new())?;
//! db.create_relationship(&mut tx, a, b, "FRIEND_OF", PropertyMap::new())?;
//! db.commit_tx(tx)?;
//!
//! let query = RelationshipSignature::wildcard("FRIEND_OF", Direction::Outgoing);
//! assert_eq!(module.fallback_counter().count(&db, a, &query)?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Counters
//!
//! | Counter | Source | Fails with |
//! |---------|--------|------------|
//! | `NaiveCounter` | incident relationships | never (besides storage errors) |
//! | `CachedCounter` | node ledger | `UnableToCount`, `EngineInactive` |
//! | `FallbackCounter` | ledger, then traversal | `EngineInactive` |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod predicate;
pub mod signature;
pub mod codec;
pub mod compact;
pub mod cache;
pub mod count;
pub mod config;
pub mod module;
pub mod storage;
pub mod tx;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap,
    NodeId, RelId, Direction, props,
};

// ============================================================================
// Re-exports: Counting core
// ============================================================================

pub use predicate::ValuePredicate;
pub use signature::{RelationshipSignature, SignatureMatch};
pub use compact::{
    CompactionStrategy, GeneralizationStrategy, ThresholdCompaction,
    ClosestPair, FrequentlyChanging, DEFAULT_THRESHOLD,
};
pub use cache::{Bucket, DegreeCachingNode, Group, LedgerBatch};
pub use count::{RelationshipCounter, NaiveCounter, CachedCounter, FallbackCounter};
pub use config::{RelationshipCountConfig, RelcountSettings};
pub use module::RelationshipCountModule;

// ============================================================================
// Re-exports: Storage and transactions
// ============================================================================

pub use storage::{StorageBackend, GraphAccess, MemoryBackend};
pub use tx::{Transaction, TxMode, TxId, TransactionData, TransactionListener, Change};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Illegal value: {0}")]
    IllegalValue(String),

    #[error("Unable to count: {0}")]
    UnableToCount(String),

    #[error("Count overflow: {0}")]
    CountOverflow(String),

    #[error("Relationship count engine inactive: {0}")]
    EngineInactive(String),

    #[error("Invalid ledger key {key:?}: {message}")]
    InvalidLedgerKey { key: String, message: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
