//! Generalize the properties whose values vary the most.

use std::collections::BTreeSet;

use hashbrown::HashSet;
use tracing::debug;

use crate::cache::Group;
use crate::predicate::ValuePredicate;
use crate::signature::RelationshipSignature;
use super::{ClosestPair, GeneralizationStrategy};

/// Relaxes the most frequently changing properties first.
///
/// For each property key of a group, the change frequency is
///
/// ```text
/// (distinct predicates on the key + weight of buckets where it is Any) / (group total + 1)
/// ```
///
/// Keys are tried in descending frequency. Each new key is tried alone, then
/// together with every key set tried before it. The first key set for which
/// relaxing one bucket covers at least two buckets wins; among candidate
/// buckets, the generalization covering the most buckets is returned.
///
/// Falls back to [`ClosestPair`] if no key set compacts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequentlyChanging;

impl GeneralizationStrategy for FrequentlyChanging {
    fn generalize(&self, group: &Group) -> Option<RelationshipSignature> {
        let mut tried: Vec<BTreeSet<String>> = Vec::new();
        for (key, frequency) in change_frequencies(group) {
            let mut attempts = vec![BTreeSet::from([key.clone()])];
            attempts.extend(tried.iter().map(|used| {
                let mut keys = used.clone();
                keys.insert(key.clone());
                keys
            }));
            tried.extend(attempts.iter().cloned());

            for keys in &attempts {
                if let Some(generalization) = widest_generalization(group, keys) {
                    debug!(key = %key, frequency, relaxed = keys.len(), "relcount.compaction.frequently_changing");
                    return Some(generalization);
                }
            }
        }
        ClosestPair.generalize(group)
    }
}

/// `(key, frequency)`, most frequently changing first, ties by key.
pub fn change_frequencies(group: &Group) -> Vec<(String, f64)> {
    let keys: BTreeSet<&str> = group
        .buckets()
        .flat_map(|b| b.signature.properties().map(|(k, _)| k))
        .collect();
    let denominator = group.total() as f64 + 1.0;

    let mut frequencies: Vec<(String, f64)> = keys
        .into_iter()
        .map(|key| {
            let mut distinct: HashSet<&ValuePredicate> = HashSet::new();
            let mut wildcards = 0u64;
            for bucket in group.buckets() {
                match bucket.signature.get(key) {
                    ValuePredicate::Any => wildcards += bucket.count,
                    predicate => {
                        distinct.insert(predicate);
                    }
                }
            }
            (key.to_owned(), (distinct.len() as f64 + wildcards as f64) / denominator)
        })
        .collect();

    frequencies.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    frequencies
}

/// Relax `keys` on each bucket in turn; keep the result covering the most
/// buckets, if it covers at least two.
fn widest_generalization(group: &Group, keys: &BTreeSet<String>) -> Option<RelationshipSignature> {
    let mut best = None;
    let mut most = 1;
    for candidate in group.buckets() {
        let generalization = candidate.signature.generalize(keys);
        let covered = group
            .buckets()
            .filter(|b| generalization.is_more_general_than(&b.signature))
            .count();
        if covered > most {
            most = covered;
            best = Some(generalization);
        }
    }
    best
}
