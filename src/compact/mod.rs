//! # Compaction
//!
//! Keeps every ledger group at or below a bucket threshold by merging
//! buckets into generalized ones. Compaction never changes a group's total;
//! it only makes some future queries unanswerable from the cache.
//!
//! [`ThresholdCompaction`] decides *when*; a [`GeneralizationStrategy`]
//! decides *what* to merge:
//!
//! | Strategy | Picks |
//! |----------|-------|
//! | [`ClosestPair`] | the two buckets differing in the fewest properties |
//! | [`FrequentlyChanging`] | the property set whose values vary the most |

pub mod closest_pair;
pub mod frequently_changing;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::Group;
use crate::model::NodeId;
use crate::signature::RelationshipSignature;
use crate::{Error, Result};

pub use closest_pair::ClosestPair;
pub use frequently_changing::FrequentlyChanging;

/// Default maximum number of buckets per group.
pub const DEFAULT_THRESHOLD: usize = 20;

/// Bounds the size of a ledger group after a new bucket was added.
pub trait CompactionStrategy: Send + Sync + fmt::Debug {
    fn compact(&self, node: NodeId, group: &mut Group);
}

/// Proposes a signature generalizing two or more buckets of a group.
pub trait GeneralizationStrategy: Send + Sync + fmt::Debug {
    /// `None` if no generalization covers at least two buckets.
    fn generalize(&self, group: &Group) -> Option<RelationshipSignature>;
}

// ============================================================================
// ThresholdCompaction
// ============================================================================

/// Merge buckets while a group holds more than `threshold` of them.
#[derive(Debug, Clone)]
pub struct ThresholdCompaction {
    threshold: usize,
    generalization: Arc<dyn GeneralizationStrategy>,
}

impl ThresholdCompaction {
    /// Threshold compaction merging closest pairs.
    pub fn new(threshold: usize) -> Result<Self> {
        Self::with_generalization(threshold, ClosestPair)
    }

    pub fn with_generalization(
        threshold: usize,
        generalization: impl GeneralizationStrategy + 'static,
    ) -> Result<Self> {
        if threshold == 0 {
            return Err(Error::IllegalValue("compaction threshold must be at least 1".into()));
        }
        Ok(Self { threshold, generalization: Arc::new(generalization) })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl Default for ThresholdCompaction {
    fn default() -> Self {
        Self { threshold: DEFAULT_THRESHOLD, generalization: Arc::new(ClosestPair) }
    }
}

impl CompactionStrategy for ThresholdCompaction {
    fn compact(&self, node: NodeId, group: &mut Group) {
        while group.len() > self.threshold {
            let Some(generalization) = self.generalization.generalize(group) else {
                warn!(
                    node = node.0,
                    rel_type = group.rel_type(),
                    direction = %group.direction(),
                    buckets = group.len(),
                    threshold = self.threshold,
                    "relcount.compaction.threshold_not_reached"
                );
                return;
            };
            let absorbed = group.merge(generalization);
            debug!(
                node = node.0,
                rel_type = group.rel_type(),
                direction = %group.direction(),
                absorbed,
                buckets = group.len(),
                "relcount.compaction.merged"
            );
        }
    }
}
