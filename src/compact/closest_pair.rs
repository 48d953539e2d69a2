//! Merge the two most similar buckets.

use crate::cache::Group;
use crate::signature::RelationshipSignature;
use super::GeneralizationStrategy;

/// Picks the pair of buckets whose signatures differ in the fewest property
/// predicates and relaxes those predicates to `Any`.
///
/// Ties go to the pair that comes first in ledger-key order, so the outcome
/// only depends on the group's contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosestPair;

impl GeneralizationStrategy for ClosestPair {
    fn generalize(&self, group: &Group) -> Option<RelationshipSignature> {
        let signatures: Vec<&RelationshipSignature> = group.buckets().map(|b| &b.signature).collect();

        let mut best: Option<(usize, &RelationshipSignature, &RelationshipSignature)> = None;
        for (i, &first) in signatures.iter().enumerate() {
            for &second in &signatures[i + 1..] {
                let distance = first.differing_keys(second).len();
                if best.is_none_or(|(d, _, _)| distance < d) {
                    best = Some((distance, first, second));
                }
            }
        }

        best.map(|(_, first, second)| first.generalize(&first.differing_keys(second)))
    }
}
