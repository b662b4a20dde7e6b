//! Values stored in object fields
//!
//! The layout engine only needs to know enough about a value to pick a
//! storage representation for it: small integers, doubles, and everything
//! else that lives behind a heap reference.

use crate::representation::Representation;
use std::sync::Arc;

/// Handle to an object in a [`LayoutContext`](crate::LayoutContext) heap
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Create a handle from a raw arena index
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Raw arena index
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A JavaScript value as seen by the layout engine
#[derive(Clone, Debug)]
pub enum Value {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// `true` / `false`
    Boolean(bool),
    /// Small integer (31-bit payload range is not enforced, any i32 fits)
    Smi(i32),
    /// Double that is not representable as a Smi
    Number(f64),
    /// String value (interning is the host's concern)
    String(Arc<str>),
    /// Reference to a heap object
    Object(ObjectId),
}

impl Value {
    /// Create a number, using the Smi encoding when the value is integral
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && !(n == 0.0 && n.is_sign_negative())
        {
            Self::Smi(n as i32)
        } else {
            Self::Number(n)
        }
    }

    /// Create a string value
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Numeric payload, if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Smi(i) => Some(*i as f64),
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Object handle, if this is an object
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Is this value a number of either encoding
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Smi(_) | Self::Number(_))
    }

    /// The narrowest representation able to hold this value
    pub fn optimal_representation(&self) -> Representation {
        match self {
            Self::Smi(_) => Representation::Smi,
            Self::Number(_) => Representation::Double,
            _ => Representation::HeapObject,
        }
    }

    /// Does this value fit a field of the given representation without
    /// generalizing it
    pub fn fits_representation(&self, representation: Representation) -> bool {
        match representation {
            Representation::None => false,
            Representation::Smi => matches!(self, Self::Smi(_)),
            Representation::Double => self.is_number(),
            Representation::HeapObject => !self.is_number(),
            Representation::Tagged => true,
        }
    }

    /// SameValue comparison (numbers compared by bits, NaN equals NaN)
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => {
                let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan())
            }
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Smi(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_canonicalizes_to_smi() {
        assert!(matches!(Value::number(3.0), Value::Smi(3)));
        assert!(matches!(Value::number(3.5), Value::Number(_)));
        assert!(matches!(Value::number(-0.0), Value::Number(_)));
        assert!(matches!(Value::number(1e12), Value::Number(_)));
    }

    #[test]
    fn test_optimal_representation() {
        assert_eq!(Value::Smi(1).optimal_representation(), Representation::Smi);
        assert_eq!(Value::Number(1.5).optimal_representation(), Representation::Double);
        assert_eq!(Value::Null.optimal_representation(), Representation::HeapObject);
        assert_eq!(
            Value::Object(ObjectId::from_index(0)).optimal_representation(),
            Representation::HeapObject
        );
    }

    #[test]
    fn test_same_value_numbers() {
        assert_eq!(Value::Smi(2), Value::Number(2.0));
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_ne!(Value::Number(0.0), Value::Number(-0.0));
        assert_ne!(Value::Smi(1), Value::string("1"));
    }

    #[test]
    fn test_fits_representation() {
        assert!(Value::Smi(1).fits_representation(Representation::Double));
        assert!(!Value::Number(1.5).fits_representation(Representation::Smi));
        assert!(!Value::Smi(1).fits_representation(Representation::HeapObject));
        assert!(Value::Undefined.fits_representation(Representation::Tagged));
    }
}
