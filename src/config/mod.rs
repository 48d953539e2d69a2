//! # Configuration
//!
//! [`RelationshipCountConfig`] bundles the strategies the counting module
//! consults for every relationship: which ones to count, which of their
//! properties form the signature, how much each one weighs, and how ledger
//! groups are compacted.
//!
//! [`RelcountSettings`] is the serializable form, loaded from JSON.

pub mod strategies;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compact::{
    ClosestPair, CompactionStrategy, FrequentlyChanging, ThresholdCompaction, DEFAULT_THRESHOLD,
};
use crate::model::{Direction, NodeId, Relationship};
use crate::module::RelationshipCountModule;
use crate::signature::RelationshipSignature;
use crate::{Error, Result};

pub use strategies::{
    IncludeAllBusinessProperties, IncludeAllBusinessRelationships, OneForEach, PropertyInclusion,
    RelationshipInclusion, WeighByProperty, WeighingStrategy, INTERNAL_PREFIX,
};

// ============================================================================
// RelationshipCountConfig
// ============================================================================

/// Strategies of one counting module. Cheap to clone.
#[derive(Clone)]
pub struct RelationshipCountConfig {
    relationship_inclusion: Arc<dyn RelationshipInclusion>,
    property_inclusion: Arc<dyn PropertyInclusion>,
    weighing: Arc<dyn WeighingStrategy>,
    compaction: Arc<dyn CompactionStrategy>,
}

impl Default for RelationshipCountConfig {
    fn default() -> Self {
        Self {
            relationship_inclusion: Arc::new(IncludeAllBusinessRelationships),
            property_inclusion: Arc::new(IncludeAllBusinessProperties),
            weighing: Arc::new(OneForEach),
            compaction: Arc::new(ThresholdCompaction::default()),
        }
    }
}

impl fmt::Debug for RelationshipCountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipCountConfig")
            .field("compaction", &self.compaction)
            .finish_non_exhaustive()
    }
}

impl RelationshipCountConfig {
    pub fn with_relationship_inclusion(mut self, inclusion: impl RelationshipInclusion + 'static) -> Self {
        self.relationship_inclusion = Arc::new(inclusion);
        self
    }

    pub fn with_property_inclusion(mut self, inclusion: impl PropertyInclusion + 'static) -> Self {
        self.property_inclusion = Arc::new(inclusion);
        self
    }

    pub fn with_weighing(mut self, weighing: impl WeighingStrategy + 'static) -> Self {
        self.weighing = Arc::new(weighing);
        self
    }

    pub fn with_compaction(mut self, compaction: impl CompactionStrategy + 'static) -> Self {
        self.compaction = Arc::new(compaction);
        self
    }

    /// Threshold compaction with closest-pair generalization.
    pub fn with_threshold(self, threshold: usize) -> Result<Self> {
        Ok(self.with_compaction(ThresholdCompaction::new(threshold)?))
    }

    pub fn compaction(&self) -> &dyn CompactionStrategy {
        self.compaction.as_ref()
    }

    /// Is `relationship` counted at all?
    pub fn includes(&self, relationship: &Relationship) -> bool {
        self.relationship_inclusion.include(relationship)
    }

    /// Weight of `relationship` as seen from `point_of_view`.
    pub fn weigh(&self, relationship: &Relationship, point_of_view: NodeId) -> u64 {
        self.weighing.weight(relationship, point_of_view)
    }

    /// Literal signature of `relationship` as seen in `direction`, restricted
    /// to the included properties.
    pub fn literal_signature(&self, relationship: &Relationship, direction: Direction) -> RelationshipSignature {
        RelationshipSignature::from_observed(
            relationship.rel_type.clone(),
            direction,
            &relationship.properties,
            |key| self.property_inclusion.include(key, relationship),
        )
    }
}

// ============================================================================
// RelcountSettings
// ============================================================================

/// Which [`GeneralizationStrategy`](crate::compact::GeneralizationStrategy)
/// threshold compaction uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generalization {
    #[default]
    ClosestPair,
    FrequentlyChanging,
}

/// Serializable module settings.
///
/// ```json
/// { "id": "FRC", "threshold": 20, "generalization": "closest_pair",
///   "weight_property": "weight", "excluded_relationship_types": ["AUDIT"],
///   "excluded_properties": ["timestamp"] }
/// ```
///
/// Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelcountSettings {
    pub id: String,
    pub threshold: usize,
    pub generalization: Generalization,
    pub weight_property: Option<String>,
    pub excluded_relationship_types: Vec<String>,
    pub excluded_properties: Vec<String>,
}

impl Default for RelcountSettings {
    fn default() -> Self {
        Self {
            id: RelationshipCountModule::DEFAULT_ID.to_owned(),
            threshold: DEFAULT_THRESHOLD,
            generalization: Generalization::default(),
            weight_property: None,
            excluded_relationship_types: Vec::new(),
            excluded_properties: Vec::new(),
        }
    }
}

impl RelcountSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Strategies described by these settings. The weight property, if
    /// any, is left out of signatures.
    pub fn to_config(&self) -> Result<RelationshipCountConfig> {
        if self.threshold == 0 {
            return Err(Error::IllegalValue("threshold must be at least 1".into()));
        }
        let compaction = match self.generalization {
            Generalization::ClosestPair => ThresholdCompaction::with_generalization(self.threshold, ClosestPair)?,
            Generalization::FrequentlyChanging => {
                ThresholdCompaction::with_generalization(self.threshold, FrequentlyChanging)?
            }
        };

        let excluded_types = self.excluded_relationship_types.clone();
        let mut excluded_properties = self.excluded_properties.clone();
        excluded_properties.extend(self.weight_property.iter().cloned());

        let mut config = RelationshipCountConfig::default()
            .with_compaction(compaction)
            .with_relationship_inclusion(move |r: &Relationship| {
                IncludeAllBusinessRelationships.include(r) && !excluded_types.contains(&r.rel_type)
            })
            .with_property_inclusion(move |key: &str, r: &Relationship| {
                IncludeAllBusinessProperties.include(key, r) && !excluded_properties.iter().any(|p| p == key)
            });
        if let Some(key) = &self.weight_property {
            config = config.with_weighing(WeighByProperty::new(key.clone()));
        }
        Ok(config)
    }

    /// Module configured by these settings.
    pub fn into_module(self) -> Result<RelationshipCountModule> {
        let config = self.to_config()?;
        RelationshipCountModule::new(self.id, config)
    }
}
