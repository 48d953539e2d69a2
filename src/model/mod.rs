//! # Property Graph Model
//!
//! Clean DTOs for the property graph the counting cache is built on.
//! These types cross every boundary: storage ↔ change feed ↔ ledger ↔ user.
//!
//! Design rule: this module is pure data. No I/O, no state.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;

pub use node::{Node, NodeId};
pub use relationship::{Relationship, RelId, Direction};
pub use value::{Value, array_friendly_eq, array_friendly_hash, compare_ordered};
pub use property_map::{PropertyMap, props};
