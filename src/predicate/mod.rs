//! # Value Predicates
//!
//! A closed set of constraints over a single property value, together with
//! the two relations the counting cache is built on:
//!
//! - `is_more_general_than`: every value satisfying `other` satisfies `self`
//! - `is_mutually_exclusive`: no value satisfies both
//!
//! A property that is not present on a relationship is represented by `None`
//! wherever a value is evaluated; `Undefined` is the predicate matching it.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::debug;

use crate::model::{Value, array_friendly_eq, array_friendly_hash, compare_ordered};
use crate::{Error, Result};

/// Constraint on one property value.
#[derive(Debug, Clone)]
pub enum ValuePredicate {
    /// Any legal value, or none at all.
    Any,
    /// Only the absence of the property.
    Undefined,
    EqualTo(Value),
    GreaterThan(Value),
    LessThan(Value),
    Or(Box<ValuePredicate>, Box<ValuePredicate>),
}

// ============================================================================
// Construction
// ============================================================================

impl ValuePredicate {
    pub fn equal_to(value: impl Into<Value>) -> Result<Self> {
        Ok(ValuePredicate::EqualTo(legal(value.into())?))
    }

    pub fn greater_than(value: impl Into<Value>) -> Result<Self> {
        Ok(ValuePredicate::GreaterThan(ordered(value.into())?))
    }

    pub fn less_than(value: impl Into<Value>) -> Result<Self> {
        Ok(ValuePredicate::LessThan(ordered(value.into())?))
    }

    pub fn greater_than_or_equal_to(value: impl Into<Value>) -> Result<Self> {
        let value = ordered(value.into())?;
        Ok(Self::or(ValuePredicate::GreaterThan(value.clone()), ValuePredicate::EqualTo(value)))
    }

    pub fn less_than_or_equal_to(value: impl Into<Value>) -> Result<Self> {
        let value = ordered(value.into())?;
        Ok(Self::or(ValuePredicate::LessThan(value.clone()), ValuePredicate::EqualTo(value)))
    }

    pub fn or(first: ValuePredicate, second: ValuePredicate) -> Self {
        ValuePredicate::Or(Box::new(first), Box::new(second))
    }
}

fn legal(value: Value) -> Result<Value> {
    if value.is_legal() {
        Ok(value)
    } else {
        Err(Error::IllegalValue(format!(
            "{} is not a legal predicate value ({})",
            value,
            value.type_name()
        )))
    }
}

fn ordered(value: Value) -> Result<Value> {
    if value.is_ordered() {
        Ok(value)
    } else {
        Err(Error::IllegalValue(format!(
            "{} cannot be used in a comparison ({})",
            value,
            value.type_name()
        )))
    }
}

// ============================================================================
// Evaluation
// ============================================================================

impl ValuePredicate {
    /// Does `beta` satisfy this predicate? `None` is an absent property.
    ///
    /// Fails only when `beta` is not a legal value. Comparing an ordered
    /// predicate with a value of another type is not an error, it just
    /// doesn't match.
    pub fn evaluate(&self, beta: Option<&Value>) -> Result<bool> {
        if let Some(value) = beta {
            if !value.is_legal() {
                return Err(Error::IllegalValue(format!(
                    "cannot evaluate a predicate against {} ({})",
                    value,
                    value.type_name()
                )));
            }
        }

        Ok(match self {
            ValuePredicate::Any => true,
            ValuePredicate::Undefined => beta.is_none(),
            ValuePredicate::EqualTo(v) => beta.is_some_and(|b| array_friendly_eq(v, b)),
            ValuePredicate::GreaterThan(v) => beta.is_some_and(|b| compare(v, b) == Some(Ordering::Less)),
            ValuePredicate::LessThan(v) => beta.is_some_and(|b| compare(v, b) == Some(Ordering::Greater)),
            ValuePredicate::Or(first, second) => first.evaluate(beta)? || second.evaluate(beta)?,
        })
    }
}

/// `compare_ordered`, logging the incomparable case.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    let ordering = compare_ordered(a, b);
    if ordering.is_none() {
        debug!(left = %a, right = %b, "relcount.predicate.incomparable");
    }
    ordering
}

fn lt(a: &Value, b: &Value) -> bool {
    compare_ordered(a, b) == Some(Ordering::Less)
}

fn le(a: &Value, b: &Value) -> bool {
    matches!(compare_ordered(a, b), Some(Ordering::Less | Ordering::Equal))
}

fn gt(a: &Value, b: &Value) -> bool {
    compare_ordered(a, b) == Some(Ordering::Greater)
}

fn ge(a: &Value, b: &Value) -> bool {
    matches!(compare_ordered(a, b), Some(Ordering::Greater | Ordering::Equal))
}

// ============================================================================
// Generality and exclusivity
// ============================================================================

impl ValuePredicate {
    /// True iff every value satisfying `other` also satisfies `self`.
    pub fn is_more_general_than(&self, other: &ValuePredicate) -> bool {
        use ValuePredicate::*;

        match (self, other) {
            (Any, _) => true,
            (_, Or(first, second)) => self.is_more_general_than(first) && self.is_more_general_than(second),
            (Or(first, second), _) => first.is_more_general_than(other) || second.is_more_general_than(other),
            (_, Any) => false,

            (Undefined, Undefined) => true,
            (Undefined, EqualTo(_) | GreaterThan(_) | LessThan(_)) => false,

            (EqualTo(v), EqualTo(w)) => array_friendly_eq(v, w),
            (EqualTo(_), Undefined | GreaterThan(_) | LessThan(_)) => false,

            (GreaterThan(v), EqualTo(w)) => lt(v, w),
            (GreaterThan(v), GreaterThan(w)) => le(v, w),
            (GreaterThan(_), Undefined | LessThan(_)) => false,

            (LessThan(v), EqualTo(w)) => gt(v, w),
            (LessThan(v), LessThan(w)) => ge(v, w),
            (LessThan(_), Undefined | GreaterThan(_)) => false,
        }
    }

    /// True iff no value can satisfy both predicates.
    pub fn is_mutually_exclusive(&self, other: &ValuePredicate) -> bool {
        use ValuePredicate::*;

        match (self, other) {
            (Any, _) | (_, Any) => false,
            (Or(first, second), _) => first.is_mutually_exclusive(other) && second.is_mutually_exclusive(other),
            (_, Or(first, second)) => self.is_mutually_exclusive(first) && self.is_mutually_exclusive(second),

            (Undefined, Undefined) => false,
            (Undefined, _) | (_, Undefined) => true,

            (EqualTo(v), EqualTo(w)) => !array_friendly_eq(v, w),
            // GreaterThan(w) accepts v iff w < v
            (EqualTo(v), GreaterThan(w)) | (GreaterThan(w), EqualTo(v)) => !lt(w, v),
            (EqualTo(v), LessThan(w)) | (LessThan(w), EqualTo(v)) => !gt(w, v),

            // two lower (or two upper) bounds always overlap, unless the types differ
            (GreaterThan(v), GreaterThan(w)) | (LessThan(v), LessThan(w)) => compare_ordered(v, w).is_none(),
            (GreaterThan(low), LessThan(high)) | (LessThan(high), GreaterThan(low)) => !lt(low, high),
        }
    }
}

// ============================================================================
// Equality and hashing (structural, array-friendly)
// ============================================================================

impl PartialEq for ValuePredicate {
    fn eq(&self, other: &Self) -> bool {
        use ValuePredicate::*;

        match (self, other) {
            (Any, Any) | (Undefined, Undefined) => true,
            (EqualTo(v), EqualTo(w)) | (GreaterThan(v), GreaterThan(w)) | (LessThan(v), LessThan(w)) => {
                array_friendly_eq(v, w)
            }
            (Or(a, b), Or(c, d)) => a == c && b == d,
            _ => false,
        }
    }
}

impl Eq for ValuePredicate {}

impl Hash for ValuePredicate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ValuePredicate::Any | ValuePredicate::Undefined => {}
            ValuePredicate::EqualTo(v) | ValuePredicate::GreaterThan(v) | ValuePredicate::LessThan(v) => {
                array_friendly_hash(v, state)
            }
            ValuePredicate::Or(first, second) => {
                first.hash(state);
                second.hash(state);
            }
        }
    }
}

/// Canonical ledger-key token.
impl fmt::Display for ValuePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::codec::encode_predicate(self))
    }
}
