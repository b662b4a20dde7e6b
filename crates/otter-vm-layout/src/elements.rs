//! Indexed (array) storage kinds
//!
//! ```text
//!   PackedSmi ──► PackedDouble ──► PackedObject
//!      │              │                │
//!      ▼              ▼                ▼
//!   HoleySmi  ──► HoleyDouble  ──► HoleyObject ──► Dictionary
//! ```
//!
//! Kinds only ever widen. Each shape keeps at most one elements edge, and
//! the edges follow a fixed sequence so that every path to a kind from a
//! given shape ends at the same child.

use crate::context::LayoutContext;
use crate::dictionary::NumberDictionary;
use crate::error::LayoutResult;
use crate::memory::{BarrierSlot, TAGGED_SIZE};
use crate::shape::{DescriptorOwnership, ShapeId};
use crate::value::{ObjectId, Value};

/// Backing-store kind for indexed properties
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ElementsKind {
    /// Small integers, no holes
    #[default]
    PackedSmi,
    /// Small integers with holes
    HoleySmi,
    /// Unboxed doubles, no holes
    PackedDouble,
    /// Unboxed doubles with holes
    HoleyDouble,
    /// Arbitrary values, no holes
    PackedObject,
    /// Arbitrary values with holes
    HoleyObject,
    /// Sparse number dictionary
    Dictionary,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Family {
    Smi,
    Double,
    Object,
}

impl ElementsKind {
    /// Narrowest packed kind that can hold `value`
    pub fn for_value(value: &Value) -> Self {
        match value {
            Value::Smi(_) => Self::PackedSmi,
            Value::Number(_) => Self::PackedDouble,
            _ => Self::PackedObject,
        }
    }

    /// Backing store may contain holes
    pub fn is_holey(self) -> bool {
        matches!(self, Self::HoleySmi | Self::HoleyDouble | Self::HoleyObject)
    }

    /// Backing store is a number dictionary
    pub fn is_dictionary(self) -> bool {
        self == Self::Dictionary
    }

    /// Backing store holds unboxed doubles
    pub fn is_double(self) -> bool {
        matches!(self, Self::PackedDouble | Self::HoleyDouble)
    }

    /// Holey counterpart of a packed kind
    pub fn to_holey(self) -> Self {
        match self {
            Self::PackedSmi => Self::HoleySmi,
            Self::PackedDouble => Self::HoleyDouble,
            Self::PackedObject => Self::HoleyObject,
            other => other,
        }
    }

    fn family(self) -> Option<Family> {
        match self {
            Self::PackedSmi | Self::HoleySmi => Some(Family::Smi),
            Self::PackedDouble | Self::HoleyDouble => Some(Family::Double),
            Self::PackedObject | Self::HoleyObject => Some(Family::Object),
            Self::Dictionary => None,
        }
    }

    fn from_family(family: Family, holey: bool) -> Self {
        let packed = match family {
            Family::Smi => Self::PackedSmi,
            Family::Double => Self::PackedDouble,
            Family::Object => Self::PackedObject,
        };
        if holey { packed.to_holey() } else { packed }
    }

    /// Least upper bound of two kinds
    pub fn generalize(self, other: Self) -> Self {
        match (self.family(), other.family()) {
            (Some(a), Some(b)) => Self::from_family(a.max(b), self.is_holey() || other.is_holey()),
            _ => Self::Dictionary,
        }
    }

    /// Strictly above `other` in the lattice
    pub fn is_more_general_than(self, other: Self) -> bool {
        self != other && self.generalize(other) == self
    }

    /// Next kind along the elements-edge sequence
    pub fn next_transition_kind(self) -> Option<Self> {
        match self {
            Self::PackedSmi => Some(Self::HoleySmi),
            Self::HoleySmi => Some(Self::PackedDouble),
            Self::PackedDouble => Some(Self::HoleyDouble),
            Self::HoleyDouble => Some(Self::PackedObject),
            Self::PackedObject => Some(Self::HoleyObject),
            Self::HoleyObject | Self::Dictionary => None,
        }
    }
}

/// Indexed backing store of one object. `None` entries are holes.
#[derive(Clone, Debug)]
pub enum ElementsStore {
    /// Small integers
    Smi(Vec<Option<i32>>),
    /// Unboxed doubles
    Double(Vec<Option<f64>>),
    /// Arbitrary values
    Object(Vec<Option<Value>>),
    /// Sparse storage
    Dictionary(NumberDictionary),
}

impl ElementsStore {
    /// Empty store for a kind
    pub fn for_kind(kind: ElementsKind) -> Self {
        match kind {
            ElementsKind::PackedSmi | ElementsKind::HoleySmi => Self::Smi(Vec::new()),
            ElementsKind::PackedDouble | ElementsKind::HoleyDouble => Self::Double(Vec::new()),
            ElementsKind::PackedObject | ElementsKind::HoleyObject => Self::Object(Vec::new()),
            ElementsKind::Dictionary => Self::Dictionary(NumberDictionary::new()),
        }
    }

    /// Array length implied by the store
    pub fn len(&self) -> u32 {
        match self {
            Self::Smi(v) => v.len() as u32,
            Self::Double(v) => v.len() as u32,
            Self::Object(v) => v.len() as u32,
            Self::Dictionary(d) => d.length(),
        }
    }

    /// Store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read an element
    pub fn get(&self, index: u32) -> Option<Value> {
        let i = index as usize;
        match self {
            Self::Smi(v) => v.get(i).copied().flatten().map(Value::Smi),
            Self::Double(v) => v.get(i).copied().flatten().map(Value::number),
            Self::Object(v) => v.get(i).cloned().flatten(),
            Self::Dictionary(d) => d.get(index).cloned(),
        }
    }

    /// Any hole below the length
    pub fn has_holes(&self) -> bool {
        match self {
            Self::Smi(v) => v.iter().any(Option::is_none),
            Self::Double(v) => v.iter().any(Option::is_none),
            Self::Object(v) => v.iter().any(Option::is_none),
            Self::Dictionary(_) => true,
        }
    }

    /// Does the store's representation belong to `kind`
    pub fn matches_kind(&self, kind: ElementsKind) -> bool {
        matches!(
            (self, kind),
            (Self::Smi(_), ElementsKind::PackedSmi | ElementsKind::HoleySmi)
                | (Self::Double(_), ElementsKind::PackedDouble | ElementsKind::HoleyDouble)
                | (Self::Object(_), ElementsKind::PackedObject | ElementsKind::HoleyObject)
                | (Self::Dictionary(_), ElementsKind::Dictionary)
        )
    }

    /// Bytes booked with the memory manager; dictionary storage belongs to
    /// the dictionary collaborator
    pub(crate) fn byte_size(&self) -> usize {
        match self {
            Self::Dictionary(_) => 0,
            other => other.len() as usize * TAGGED_SIZE,
        }
    }

    /// Bytes booked after a store to `index`
    pub(crate) fn byte_size_after_store(&self, index: u32) -> usize {
        match self {
            Self::Dictionary(_) => 0,
            other => other.len().max(index.saturating_add(1)) as usize * TAGGED_SIZE,
        }
    }

    /// Copy into the representation of `kind`
    pub(crate) fn converted(&self, kind: ElementsKind) -> Self {
        let values: Vec<Option<Value>> = match self {
            Self::Dictionary(d) => {
                if kind.is_dictionary() {
                    return self.clone();
                }
                (0..d.length()).map(|i| d.get(i).cloned()).collect()
            }
            other => (0..other.len()).map(|i| other.get(i)).collect(),
        };
        match kind {
            ElementsKind::PackedSmi | ElementsKind::HoleySmi => Self::Smi(
                values
                    .into_iter()
                    .map(|v| match v {
                        Some(Value::Smi(i)) => Some(i),
                        _ => None,
                    })
                    .collect(),
            ),
            ElementsKind::PackedDouble | ElementsKind::HoleyDouble => {
                Self::Double(values.into_iter().map(|v| v.and_then(|v| v.as_f64())).collect())
            }
            ElementsKind::PackedObject | ElementsKind::HoleyObject => Self::Object(values),
            ElementsKind::Dictionary => {
                let mut dict = NumberDictionary::new();
                for (index, value) in values.into_iter().enumerate() {
                    if let Some(value) = value {
                        dict.insert(index as u32, value);
                    }
                }
                Self::Dictionary(dict)
            }
        }
    }

    /// Store a value, growing with holes. Returns false when the value
    /// does not fit the store's representation.
    pub(crate) fn store(&mut self, index: u32, value: Value) -> bool {
        fn put<T>(v: &mut Vec<Option<T>>, index: usize, item: T) {
            if v.len() <= index {
                v.resize_with(index + 1, || None);
            }
            v[index] = Some(item);
        }
        let i = index as usize;
        match (self, value) {
            (Self::Smi(v), Value::Smi(n)) => put(v, i, n),
            (Self::Double(v), value) => match value.as_f64() {
                Some(n) => put(v, i, n),
                None => return false,
            },
            (Self::Object(v), value) => put(v, i, value),
            (Self::Dictionary(d), value) => d.insert(index, value),
            _ => return false,
        }
        true
    }

    /// Punch a hole. Returns whether an element was present.
    pub(crate) fn remove(&mut self, index: u32) -> bool {
        let i = index as usize;
        match self {
            Self::Smi(v) => v.get_mut(i).and_then(Option::take).is_some(),
            Self::Double(v) => v.get_mut(i).and_then(Option::take).is_some(),
            Self::Object(v) => v.get_mut(i).and_then(Option::take).is_some(),
            Self::Dictionary(d) => d.delete(index).is_some(),
        }
    }
}

impl LayoutContext {
    /// Shape for objects of `shape` whose elements moved to `to_kind`.
    ///
    /// `to_kind` is joined with the current kind first, so the result is
    /// never narrower. Fast kinds walk or extend the shape's elements-edge
    /// chain; dictionary elements get a detached copy.
    pub fn transition_array_kind(
        &mut self,
        shape: ShapeId,
        to_kind: ElementsKind,
    ) -> LayoutResult<ShapeId> {
        let record = self.check_shape(shape)?;
        let from = record.elements_kind;
        let to_kind = from.generalize(to_kind);
        if from == to_kind {
            return Ok(shape);
        }
        if to_kind.is_dictionary() || record.is_dictionary() {
            return self.copy_as_elements_kind(shape, to_kind, false);
        }

        let mut current = shape;
        while self.shape(current).elements_kind != to_kind {
            let Some(next_kind) = self.shape(current).elements_kind.next_transition_kind() else {
                break;
            };
            current = match self.shape(current).transitions.elements_target() {
                Some(next)
                    if self.shape(next).elements_kind == next_kind
                        && !self.shape(next).is_deprecated() =>
                {
                    next
                }
                _ => self.copy_as_elements_kind(current, next_kind, true)?,
            };
        }
        Ok(current)
    }

    /// Copy `shape` with a different elements kind.
    ///
    /// With `insert_transition` the copy becomes the elements edge of
    /// `shape` and shares its descriptor table, taking ownership when
    /// `shape` owned it. Otherwise the copy is detached with its own table.
    pub(crate) fn copy_as_elements_kind(
        &mut self,
        shape: ShapeId,
        kind: ElementsKind,
        insert_transition: bool,
    ) -> LayoutResult<ShapeId> {
        let mut record = self.derive_child(shape);
        record.elements_kind = kind;

        let parent = self.shape(shape);
        let transfer = insert_transition && parent.owns_descriptors();
        if insert_transition {
            record.back_pointer = Some(shape);
        } else {
            let table = self
                .table(parent.descriptors)
                .copy_up_to(parent.own_descriptors(), 0);
            record.descriptors = self.alloc_table(table)?;
            record.ownership = DescriptorOwnership::Owner;
        }

        let child = self.alloc_shape(record)?;
        if transfer {
            self.shape_mut(shape).ownership = DescriptorOwnership::Reference(child);
        }
        if insert_transition {
            self.shape_mut(shape).transitions.set_elements_target(child);
        }
        tracing::debug!(
            target: "otter::layout",
            from = shape.index(),
            to = child.index(),
            ?kind,
            insert_transition,
            "copied shape as elements kind"
        );
        Ok(child)
    }

    // ------------------------------------------------------------------
    // Object elements
    // ------------------------------------------------------------------

    /// Read an indexed element
    pub fn get_element(&self, obj: ObjectId, index: u32) -> LayoutResult<Option<Value>> {
        Ok(self.object(obj)?.elements.get(index))
    }

    /// Array length of the object's elements
    pub fn elements_length(&self, obj: ObjectId) -> LayoutResult<u32> {
        Ok(self.object(obj)?.elements.len())
    }

    /// Store an indexed element, widening the elements kind as needed.
    ///
    /// Stores that open a gap wider than `max_elements_gap` move the
    /// elements to dictionary mode; smaller gaps make the kind holey.
    pub fn set_element(&mut self, obj: ObjectId, index: u32, value: Value) -> LayoutResult<()> {
        let shape = self.ensure_current(obj)?;
        let kind = self.shape(shape).elements_kind;
        let length = self.objects[obj.index()].elements.len();

        let mut needed = kind.generalize(ElementsKind::for_value(&value));
        if !kind.is_dictionary() && index > length {
            needed = if index - length > self.config.max_elements_gap {
                ElementsKind::Dictionary
            } else {
                needed.to_holey()
            };
        }
        if needed != kind {
            self.transition_elements_kind(obj, needed)?;
        }

        let object = &mut self.objects[obj.index()];
        let before = object.elements.byte_size();
        let after = object.elements.byte_size_after_store(index);
        if after > before {
            self.memory.alloc(after - before)?;
        }
        let slot = if object.elements.matches_kind(ElementsKind::Dictionary) {
            BarrierSlot::Dictionary
        } else {
            BarrierSlot::Element(index)
        };
        let is_reference = matches!(value, Value::Object(_) | Value::String(_));
        let stored = object.elements.store(index, value);
        debug_assert!(stored, "elements kind does not admit stored value");
        if is_reference {
            self.memory.record_write(obj, slot);
        }
        Ok(())
    }

    /// Delete an indexed element, making the kind holey
    pub fn delete_element(&mut self, obj: ObjectId, index: u32) -> LayoutResult<bool> {
        let shape = self.ensure_current(obj)?;
        let kind = self.shape(shape).elements_kind;
        if self.objects[obj.index()].elements.get(index).is_none() {
            return Ok(false);
        }
        if !kind.is_holey() && !kind.is_dictionary() {
            self.transition_elements_kind(obj, kind.to_holey())?;
        }
        Ok(self.objects[obj.index()].elements.remove(index))
    }

    /// Move an object's elements to at least `to_kind`, converting the
    /// backing store
    pub fn transition_elements_kind(
        &mut self,
        obj: ObjectId,
        to_kind: ElementsKind,
    ) -> LayoutResult<()> {
        let shape = self.ensure_current(obj)?;
        let from = self.shape(shape).elements_kind;
        let to_kind = from.generalize(to_kind);
        if from == to_kind {
            return Ok(());
        }
        let target = self.transition_array_kind(shape, to_kind)?;

        let object = &mut self.objects[obj.index()];
        let converted = object.elements.converted(to_kind);
        let (before, after) = (object.elements.byte_size(), converted.byte_size());
        if after > before {
            self.memory.alloc(after - before)?;
        } else {
            self.memory.free(before - after);
        }
        object.elements = converted;
        object.publish_shape(target);
        self.stats.elements_transitions += 1;
        tracing::debug!(
            target: "otter::layout",
            object = obj.index(),
            ?from,
            to = ?to_kind,
            "elements kind transition"
        );
        Ok(())
    }
}
