//! Field storage representations
//!
//! ```text
//!            Tagged
//!          /   |    \
//!       Smi  Double  HeapObject
//!          \   |    /
//!             None
//! ```
//!
//! `None` is the representation of a field that has never been written.
//! Siblings only meet at `Tagged`.

use std::fmt;

/// Storage encoding of a field
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Representation {
    /// Nothing stored yet
    #[default]
    None,
    /// Small integer stored unboxed
    Smi,
    /// Double stored in a mutable boxed cell owned by the field
    Double,
    /// Reference to a heap value
    HeapObject,
    /// Anything
    Tagged,
}

impl Representation {
    /// Is this the bottom element
    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::None
    }

    /// Is this the Smi representation
    #[inline]
    pub fn is_smi(self) -> bool {
        self == Self::Smi
    }

    /// Is this the Double representation
    #[inline]
    pub fn is_double(self) -> bool {
        self == Self::Double
    }

    /// Is this the HeapObject representation
    #[inline]
    pub fn is_heap_object(self) -> bool {
        self == Self::HeapObject
    }

    /// Is this the top element
    #[inline]
    pub fn is_tagged(self) -> bool {
        self == Self::Tagged
    }

    /// Least upper bound of two representations
    pub fn generalize(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::None, b) => b,
            (a, Self::None) => a,
            _ => Self::Tagged,
        }
    }

    /// Strictly above `other` in the lattice
    pub fn is_more_general_than(self, other: Self) -> bool {
        match (self, other) {
            (a, b) if a == b => false,
            (_, Self::None) => true,
            (Self::Tagged, _) => true,
            _ => false,
        }
    }

    /// `self` is at or below `other`
    pub fn fits_into(self, other: Self) -> bool {
        self == other || other.is_more_general_than(self)
    }

    /// Can a field of this representation become `other` without touching
    /// any object that already uses it.
    ///
    /// Double fields own a boxed cell, so changing to or from Double always
    /// needs a relayout. Everything else already stores a tagged word.
    pub fn can_be_in_place_changed_to(self, other: Self) -> bool {
        if self == other {
            return true;
        }
        match self {
            Self::None => !other.is_double(),
            Self::Smi | Self::HeapObject => other.is_tagged(),
            Self::Double | Self::Tagged => false,
        }
    }

    /// Fields of this representation hold a boxed double cell
    #[inline]
    pub fn is_boxed_double(self) -> bool {
        self.is_double()
    }

    /// Representation a field of `self` widens to so it can also hold
    /// values of `incoming`.
    ///
    /// Same as [`generalize`](Self::generalize) except for numbers: a Smi
    /// field asked to hold doubles becomes a Double field, since every Smi
    /// converts exactly into a boxed double, and a Double field keeps
    /// accepting Smis.
    pub fn generalize_field(self, incoming: Self) -> Self {
        match (self, incoming) {
            (Self::Smi, Self::Double) | (Self::Double, Self::Smi) => Self::Double,
            (a, b) => a.generalize(b),
        }
    }

    /// Can a field of this representation take over the values of a field
    /// of `other` without widening
    pub fn accommodates(self, other: Self) -> bool {
        self.generalize_field(other) == self
    }

    /// Short lowercase name used in logs
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Smi => "smi",
            Self::Double => "double",
            Self::HeapObject => "heap-object",
            Self::Tagged => "tagged",
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::Representation::{self, *};

    const ALL: [Representation; 5] = [None, Smi, Double, HeapObject, Tagged];

    #[test]
    fn test_generalize_is_lattice_join() {
        assert_eq!(None.generalize(Smi), Smi);
        assert_eq!(Double.generalize(None), Double);
        assert_eq!(Smi.generalize(Double), Tagged);
        assert_eq!(HeapObject.generalize(Smi), Tagged);
        assert_eq!(HeapObject.generalize(HeapObject), HeapObject);
        for a in ALL {
            assert_eq!(a.generalize(Tagged), Tagged);
            for b in ALL {
                assert_eq!(a.generalize(b), b.generalize(a));
                assert!(a.fits_into(a.generalize(b)));
                assert!(b.fits_into(a.generalize(b)));
            }
        }
    }

    #[test]
    fn test_siblings_are_incomparable() {
        assert!(!Smi.fits_into(Double));
        assert!(!Double.fits_into(Smi));
        assert!(!HeapObject.fits_into(Double));
        assert!(None.fits_into(Smi));
        assert!(Smi.fits_into(Tagged));
    }

    #[test]
    fn test_in_place_changes() {
        assert!(None.can_be_in_place_changed_to(Smi));
        assert!(None.can_be_in_place_changed_to(HeapObject));
        assert!(!None.can_be_in_place_changed_to(Double));
        assert!(Smi.can_be_in_place_changed_to(Tagged));
        assert!(!Smi.can_be_in_place_changed_to(Double));
        assert!(!Double.can_be_in_place_changed_to(Tagged));
    }

    #[test]
    fn test_field_widening_keeps_numbers_unboxed_apart() {
        assert_eq!(Smi.generalize_field(Double), Double);
        assert_eq!(Double.generalize_field(Smi), Double);
        assert_eq!(Double.generalize_field(HeapObject), Tagged);
        assert_eq!(None.generalize_field(Double), Double);
        assert!(Double.accommodates(Smi));
        assert!(!Smi.accommodates(Double));
        assert!(Tagged.accommodates(Double));
        for a in ALL {
            for b in ALL {
                let w = a.generalize_field(b);
                assert!(w.accommodates(a) && w.accommodates(b));
            }
        }
    }
}
