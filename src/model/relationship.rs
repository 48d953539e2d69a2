//! Relationship (edge) in the property graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use super::{NodeId, PropertyMap, Value};
use crate::{Error, Result};

/// Opaque relationship identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelId(pub u64);

impl std::fmt::Display for RelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traversal direction, relative to a point-of-view node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    /// `Both` on either side matches anything; otherwise directions must be equal.
    pub fn matches(self, other: Direction) -> bool {
        self == Direction::Both || other == Direction::Both || self == other
    }

    /// The concrete directions a query in this direction spans.
    pub fn expand(self) -> &'static [Direction] {
        match self {
            Direction::Outgoing => &[Direction::Outgoing],
            Direction::Incoming => &[Direction::Incoming],
            Direction::Both => &[Direction::Outgoing, Direction::Incoming],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Outgoing => "OUTGOING",
            Direction::Incoming => "INCOMING",
            Direction::Both => "BOTH",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OUTGOING" => Ok(Direction::Outgoing),
            "INCOMING" => Ok(Direction::Incoming),
            "BOTH" => Ok(Direction::Both),
            other => Err(Error::IllegalValue(format!("unknown direction '{other}'"))),
        }
    }
}

/// A relationship (directed edge) in the property graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelId,
    pub src: NodeId,
    pub dst: NodeId,
    pub rel_type: String,
    pub properties: PropertyMap,
}

impl Relationship {
    pub fn new(id: RelId, src: NodeId, dst: NodeId, rel_type: impl Into<String>) -> Self {
        Self {
            id,
            src,
            dst,
            rel_type: rel_type.into(),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.src == self.dst
    }

    /// Direction of this relationship as seen from `point_of_view`.
    ///
    /// A self-relationship is both outgoing and incoming; `default` decides
    /// which one the caller is asking about.
    pub fn direction_from(&self, point_of_view: NodeId, default: Direction) -> Result<Direction> {
        if self.src != point_of_view && self.dst != point_of_view {
            return Err(Error::IllegalValue(format!(
                "relationship {} does not have node {point_of_view} on either end",
                self.id
            )));
        }
        if self.is_self_loop() {
            return Ok(default);
        }
        Ok(if self.src == point_of_view { Direction::Outgoing } else { Direction::Incoming })
    }

    /// Every direction in which `point_of_view` sees this relationship: both
    /// for a self-relationship, exactly one otherwise.
    pub fn directions_from(&self, point_of_view: NodeId) -> Result<SmallVec<[Direction; 2]>> {
        if self.is_self_loop() && self.src == point_of_view {
            return Ok(smallvec![Direction::Outgoing, Direction::Incoming]);
        }
        Ok(smallvec![self.direction_from(point_of_view, Direction::Outgoing)?])
    }
}
