//! Refined field types
//!
//! A field type narrows what heap references a field may hold. It is purely
//! an optimization hint: optimized code may assume that every object stored
//! in a `Class` field has one of the listed shapes.

use crate::representation::Representation;
use crate::shape::ShapeId;
use crate::value::Value;
use smallvec::SmallVec;

/// Sorted, duplicate-free set of shapes
pub type ClassSet = SmallVec<[ShapeId; 5]>;

/// Refined type of a field
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FieldType {
    /// Nothing stored yet
    #[default]
    None,
    /// Only objects with one of these shapes
    Class(ClassSet),
    /// Unconstrained
    Any,
}

impl FieldType {
    /// Field type admitting a single shape
    pub fn class(shape: ShapeId) -> Self {
        let mut set = ClassSet::new();
        set.push(shape);
        Self::Class(set)
    }

    /// Is this the bottom element
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Is this the top element
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Shapes in a class set (empty for None and Any)
    pub fn classes(&self) -> &[ShapeId] {
        match self {
            Self::Class(set) => set,
            _ => &[],
        }
    }

    /// Subtype check: every value admitted by `self` is admitted by `other`
    pub fn now_is(&self, other: &FieldType) -> bool {
        match (self, other) {
            (Self::None, _) => true,
            (_, Self::Any) => true,
            (Self::Class(a), Self::Class(b)) => a.iter().all(|shape| b.contains(shape)),
            _ => false,
        }
    }

    /// Does a value with the given shape (or no shape) fit this type
    pub fn admits(&self, shape: Option<ShapeId>) -> bool {
        match self {
            Self::None => false,
            Self::Any => true,
            Self::Class(set) => shape.is_some_and(|s| set.contains(&s)),
        }
    }

    /// Join of two field types.
    ///
    /// Class sets are unioned only while every member is still stable and
    /// the union stays within `max_classes`; otherwise the result is `Any`.
    pub fn merge(
        &self,
        other: &FieldType,
        max_classes: usize,
        is_stable: impl Fn(ShapeId) -> bool,
    ) -> FieldType {
        if self.now_is(other) {
            return other.clone();
        }
        if other.now_is(self) {
            return self.clone();
        }
        match (self, other) {
            (Self::Class(a), Self::Class(b)) => {
                if !a.iter().chain(b.iter()).all(|s| is_stable(*s)) {
                    return Self::Any;
                }
                let mut union: ClassSet = a.clone();
                for shape in b {
                    if let Err(pos) = union.binary_search(shape) {
                        union.insert(pos, *shape);
                    }
                }
                if union.len() > max_classes {
                    Self::Any
                } else {
                    Self::Class(union)
                }
            }
            _ => Self::Any,
        }
    }

    /// Narrowest field type for storing `value` in a field of the given
    /// representation. `shape_of` resolves an object to its shape when that
    /// shape is stable enough to be tracked.
    pub fn optimal(
        value: &Value,
        representation: Representation,
        shape_of: impl Fn(&Value) -> Option<ShapeId>,
    ) -> FieldType {
        match representation {
            Representation::None => Self::None,
            Representation::HeapObject => match shape_of(value) {
                Some(shape) => Self::class(shape),
                None => Self::Any,
            },
            _ => Self::Any,
        }
    }
}
