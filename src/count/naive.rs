//! Count by walking every incident relationship.

use crate::config::RelationshipCountConfig;
use crate::model::NodeId;
use crate::signature::RelationshipSignature;
use crate::storage::GraphAccess;
use crate::{Error, Result};
use super::RelationshipCounter;

/// Always exact, linear in the node's degree. A node that does not exist
/// has no relationships.
#[derive(Debug, Clone, Default)]
pub struct NaiveCounter {
    config: RelationshipCountConfig,
}

impl NaiveCounter {
    pub fn new(config: RelationshipCountConfig) -> Self {
        Self { config }
    }
}

impl RelationshipCounter for NaiveCounter {
    fn count(&self, graph: &dyn GraphAccess, node: NodeId, query: &RelationshipSignature) -> Result<u64> {
        let mut total = 0u64;
        for relationship in graph.incident_relationships(node)? {
            if relationship.rel_type != query.rel_type() || !self.config.includes(&relationship) {
                continue;
            }
            for direction in relationship.directions_from(node)? {
                let literal = self.config.literal_signature(&relationship, direction);
                if query.is_more_general_than(&literal) {
                    let weight = self.config.weigh(&relationship, node);
                    total = total.checked_add(weight).ok_or_else(|| {
                        Error::CountOverflow(format!("node {node}: {query} exceeds {}", u64::MAX))
                    })?;
                }
            }
        }
        Ok(total)
    }
}
