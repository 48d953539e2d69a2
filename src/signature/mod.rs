//! # Relationship Signatures
//!
//! A [`RelationshipSignature`] is `(type, direction, key → predicate, literal)`.
//! It describes either one observed relationship (a *literal* signature,
//! where every key not mentioned is implicitly [`ValuePredicate::Undefined`])
//! or a query / cache bucket (a *wildcard* signature, where every key not
//! mentioned is implicitly [`ValuePredicate::Any`]).
//!
//! Signatures are kept canonical: a key whose predicate equals the implicit
//! default is never stored, so two signatures describing the same set of
//! relationships compare equal.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::model::{Direction, PropertyMap, Value};
use crate::predicate::ValuePredicate;
use crate::Result;

static ANY: ValuePredicate = ValuePredicate::Any;
static UNDEFINED: ValuePredicate = ValuePredicate::Undefined;

/// How a bucket relates to a counting query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMatch {
    /// Every relationship in the bucket satisfies the query.
    Subsumed,
    /// No relationship in the bucket satisfies the query.
    Disjoint,
    /// The bucket mixes relationships the query cannot tell apart.
    Ambiguous,
}

/// Type, direction and property constraints of a set of relationships.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipSignature {
    rel_type: String,
    direction: Direction,
    properties: BTreeMap<String, ValuePredicate>,
    literal: bool,
}

impl RelationshipSignature {
    /// Empty literal signature: no properties at all.
    pub fn literal(rel_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            rel_type: rel_type.into(),
            direction,
            properties: BTreeMap::new(),
            literal: true,
        }
    }

    /// Empty wildcard signature: any properties.
    pub fn wildcard(rel_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            rel_type: rel_type.into(),
            direction,
            properties: BTreeMap::new(),
            literal: false,
        }
    }

    /// Literal signature of an observed relationship.
    ///
    /// Keys rejected by `include`, `Null` values and values no predicate can
    /// hold (maps, lists of non-scalars) are treated as absent.
    pub fn from_observed(
        rel_type: impl Into<String>,
        direction: Direction,
        properties: &PropertyMap,
        include: impl Fn(&str) -> bool,
    ) -> Self {
        let mut signature = Self::literal(rel_type, direction);
        for (key, value) in properties {
            if value.is_null() || !include(key) {
                continue;
            }
            if !value.is_legal() {
                debug!(key = %key, kind = value.type_name(), "relcount.signature.property_skipped");
                continue;
            }
            signature = signature.with(key.clone(), ValuePredicate::EqualTo(value.clone()));
        }
        signature
    }

    /// Wildcard signature of a counting query.
    pub fn from_query<K: Into<String>>(
        rel_type: impl Into<String>,
        direction: Direction,
        constraints: impl IntoIterator<Item = (K, ValuePredicate)>,
    ) -> Self {
        constraints
            .into_iter()
            .fold(Self::wildcard(rel_type, direction), |sig, (key, predicate)| sig.with(key, predicate))
    }

    /// Constrain `key`. Replaces any previous predicate on it.
    pub fn with(mut self, key: impl Into<String>, predicate: ValuePredicate) -> Self {
        let key = key.into();
        if predicate == *self.implicit() {
            self.properties.remove(&key);
        } else {
            self.properties.insert(key, predicate);
        }
        self
    }

    /// Shorthand for `with(key, EqualTo(value))`.
    pub fn with_value(self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Ok(self.with(key, ValuePredicate::equal_to(value)?))
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn rel_type(&self) -> &str {
        &self.rel_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_literal(&self) -> bool {
        self.literal
    }

    /// Explicitly constrained keys and their predicates, sorted by key.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &ValuePredicate)> {
        self.properties.iter().map(|(k, p)| (k.as_str(), p))
    }

    /// Predicate on `key`, implicit default included.
    pub fn get(&self, key: &str) -> &ValuePredicate {
        self.properties.get(key).unwrap_or_else(|| self.implicit())
    }

    fn implicit(&self) -> &'static ValuePredicate {
        if self.literal { &UNDEFINED } else { &ANY }
    }

    /// True unless this is the exact signature of some relationship.
    pub fn is_generalized(&self) -> bool {
        !self.literal || self.properties.values().any(|p| !matches!(p, ValuePredicate::EqualTo(_)))
    }

    fn keys_with<'a>(&'a self, other: &'a Self) -> BTreeSet<&'a str> {
        self.properties.keys().chain(other.properties.keys()).map(String::as_str).collect()
    }

    /// Keys on which the two signatures carry different predicates.
    pub fn differing_keys(&self, other: &Self) -> BTreeSet<String> {
        self.keys_with(other)
            .into_iter()
            .filter(|k| self.get(k) != other.get(k))
            .map(str::to_owned)
            .collect()
    }

    /// This signature with every key in `keys` relaxed to `Any`.
    pub fn generalize<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Self {
        keys.into_iter().fold(self.clone(), |sig, key| sig.with(key.clone(), ValuePredicate::Any))
    }

    // ========================================================================
    // Relations
    // ========================================================================

    /// True iff every relationship described by `other` is described by `self`.
    pub fn is_more_general_than(&self, other: &Self) -> bool {
        self.rel_type == other.rel_type
            && (self.direction == other.direction || self.direction == Direction::Both)
            && self
                .keys_with(other)
                .into_iter()
                .all(|k| self.get(k).is_more_general_than(other.get(k)))
    }

    /// True iff no relationship can be described by both signatures.
    pub fn is_mutually_exclusive(&self, other: &Self) -> bool {
        self.rel_type != other.rel_type
            || !self.direction.matches(other.direction)
            || self
                .keys_with(other)
                .into_iter()
                .any(|k| self.get(k).is_mutually_exclusive(other.get(k)))
    }

    /// Classify a cache bucket against this query.
    pub fn matches(&self, bucket: &Self) -> SignatureMatch {
        if self.is_mutually_exclusive(bucket) {
            SignatureMatch::Disjoint
        } else if self.is_more_general_than(bucket) {
            SignatureMatch::Subsumed
        } else {
            SignatureMatch::Ambiguous
        }
    }
}

impl fmt::Display for RelationshipSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::codec::encode_signature(self))
    }
}
