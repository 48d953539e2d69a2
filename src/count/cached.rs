//! Count from the node's ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{DegreeCachingNode, Group};
use crate::model::NodeId;
use crate::signature::{RelationshipSignature, SignatureMatch};
use crate::storage::GraphAccess;
use crate::{Error, Result};
use super::RelationshipCounter;

/// Reads the ledger kept by a running counting module.
///
/// Literal queries need a bucket for exactly that signature. Any other query
/// is answered by classifying every bucket of the matching groups; a single
/// bucket the query cannot separate makes the whole query fail with
/// [`Error::UnableToCount`]. Partial sums are never returned.
#[derive(Debug, Clone)]
pub struct CachedCounter {
    prefix: String,
    active: Arc<AtomicBool>,
}

impl CachedCounter {
    /// Counter over ledgers under `prefix`, usable while `active` is set.
    pub fn new(prefix: impl Into<String>, active: Arc<AtomicBool>) -> Self {
        Self { prefix: prefix.into(), active }
    }

    fn count_group(&self, node: NodeId, group: &Group, query: &RelationshipSignature) -> Result<u64> {
        if query.is_literal() && !query.is_generalized() {
            return match group.exact(query) {
                Some(bucket) => Ok(bucket.count),
                None if group.buckets().any(|b| !b.signature.is_mutually_exclusive(query)) => {
                    Err(Error::UnableToCount(format!(
                        "node {node}: no literal bucket for {query}, ledger is compacted"
                    )))
                }
                None => Ok(0),
            };
        }

        let mut total = 0;
        for bucket in group.buckets() {
            match query.matches(&bucket.signature) {
                SignatureMatch::Subsumed => total += bucket.count,
                SignatureMatch::Disjoint => {}
                SignatureMatch::Ambiguous => {
                    return Err(Error::UnableToCount(format!(
                        "node {node}: bucket {} is ambiguous for {query}",
                        bucket.signature
                    )));
                }
            }
        }
        Ok(total)
    }
}

impl RelationshipCounter for CachedCounter {
    fn count(&self, graph: &dyn GraphAccess, node: NodeId, query: &RelationshipSignature) -> Result<u64> {
        if !self.active.load(Ordering::Acquire) {
            return Err(Error::EngineInactive(format!(
                "no module maintains ledgers under {}",
                self.prefix
            )));
        }

        // a node that does not exist has an empty ledger
        let ledger = match DegreeCachingNode::load(graph, node, &self.prefix) {
            Err(Error::NotFound(_)) => return Ok(0),
            loaded => loaded?,
        };
        let mut total = 0;
        for &direction in query.direction().expand() {
            if let Some(group) = ledger.group(query.rel_type(), direction) {
                let scoped = query.clone().with_direction(direction);
                total += self.count_group(node, group, &scoped)?;
            }
        }
        Ok(total)
    }
}
