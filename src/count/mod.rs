//! # Counting
//!
//! Three ways to answer `count(node, query)`:
//!
//! | Counter | Reads | Exact | Fails with |
//! |---------|-------|-------|------------|
//! | [`NaiveCounter`] | every incident relationship | always | storage errors only |
//! | [`CachedCounter`] | the node's ledger | or fails | `UnableToCount`, `EngineInactive` |
//! | [`FallbackCounter`] | ledger, then relationships | always | `EngineInactive` |
//!
//! A `Both` query counts a self-relationship once per side.

pub mod cached;
pub mod fallback;
pub mod naive;

use crate::model::NodeId;
use crate::signature::RelationshipSignature;
use crate::storage::GraphAccess;
use crate::Result;

pub use cached::CachedCounter;
pub use fallback::FallbackCounter;
pub use naive::NaiveCounter;

/// Counts the relationships of a node described by a signature, weighted.
pub trait RelationshipCounter {
    fn count(&self, graph: &dyn GraphAccess, node: NodeId, query: &RelationshipSignature) -> Result<u64>;
}
