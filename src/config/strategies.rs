//! Inclusion and weighing strategies.
//!
//! Each strategy is a small object-safe trait. Closures with the matching
//! signature implement them directly, so ad-hoc policies need no new type.

use crate::model::{NodeId, Relationship};

/// Key and type prefix reserved for internal data. Never business data.
pub const INTERNAL_PREFIX: &str = "_GA_";

/// Decides which relationships are counted at all.
pub trait RelationshipInclusion: Send + Sync {
    fn include(&self, relationship: &Relationship) -> bool;
}

/// Decides which properties of a relationship take part in its signature.
pub trait PropertyInclusion: Send + Sync {
    fn include(&self, key: &str, relationship: &Relationship) -> bool;
}

/// How much one relationship contributes to the count of `point_of_view`.
pub trait WeighingStrategy: Send + Sync {
    fn weight(&self, relationship: &Relationship, point_of_view: NodeId) -> u64;
}

impl<F> RelationshipInclusion for F
where
    F: Fn(&Relationship) -> bool + Send + Sync,
{
    fn include(&self, relationship: &Relationship) -> bool {
        self(relationship)
    }
}

impl<F> PropertyInclusion for F
where
    F: Fn(&str, &Relationship) -> bool + Send + Sync,
{
    fn include(&self, key: &str, relationship: &Relationship) -> bool {
        self(key, relationship)
    }
}

impl<F> WeighingStrategy for F
where
    F: Fn(&Relationship, NodeId) -> u64 + Send + Sync,
{
    fn weight(&self, relationship: &Relationship, point_of_view: NodeId) -> u64 {
        self(relationship, point_of_view)
    }
}

// ============================================================================
// Defaults
// ============================================================================

/// Every relationship whose type is not internal.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAllBusinessRelationships;

impl RelationshipInclusion for IncludeAllBusinessRelationships {
    fn include(&self, relationship: &Relationship) -> bool {
        !relationship.rel_type.starts_with(INTERNAL_PREFIX)
    }
}

/// Every property whose key is not internal.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAllBusinessProperties;

impl PropertyInclusion for IncludeAllBusinessProperties {
    fn include(&self, key: &str, _relationship: &Relationship) -> bool {
        !key.starts_with(INTERNAL_PREFIX)
    }
}

/// Every relationship counts once.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneForEach;

impl WeighingStrategy for OneForEach {
    fn weight(&self, _relationship: &Relationship, _point_of_view: NodeId) -> u64 {
        1
    }
}

/// Weight read from an integer property; `default` when it is missing,
/// negative or not an integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeighByProperty {
    pub key: String,
    pub default: u64,
}

impl WeighByProperty {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), default: 1 }
    }

    pub fn with_default(mut self, default: u64) -> Self {
        self.default = default;
        self
    }
}

impl WeighingStrategy for WeighByProperty {
    fn weight(&self, relationship: &Relationship, _point_of_view: NodeId) -> u64 {
        relationship
            .properties
            .get(&self.key)
            .and_then(|v| v.as_int())
            .and_then(|w| u64::try_from(w).ok())
            .unwrap_or(self.default)
    }
}
