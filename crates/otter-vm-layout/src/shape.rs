//! Hidden Classes (Shapes) for object layout.
//!
//! A Shape describes the layout of an object: its instance size, how many
//! fields live inline, which descriptor table prefix names its properties,
//! and how it relates to other shapes in the transition tree.
//!
//! Shapes live in the [`LayoutContext`](crate::LayoutContext) arena and are
//! referenced by [`ShapeId`]. Parents own a map of child transitions; children
//! point back at their parent. Once objects may observe a shape it only
//! changes by gaining transitions, by in-place field generalization, or by
//! being deprecated.

use crate::descriptors::DescriptorTableId;
use crate::elements::ElementsKind;
use crate::property::{PropertyAttributes, PropertyKey};
use crate::value::ObjectId;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::num::NonZeroU32;

/// Maximum number of cached prototype transitions per shape
pub const PROTOTYPE_TRANSITION_CACHE_SIZE: usize = 4;

/// Handle to a shape in the context arena
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(NonZeroU32);

impl ShapeId {
    /// Create a handle from a raw arena index
    pub const fn from_index(index: u32) -> Self {
        match NonZeroU32::new(index.wrapping_add(1)) {
            Some(id) => Self(id),
            None => panic!("shape index overflow"),
        }
    }

    /// Raw arena index
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0.get().wrapping_sub(1) as usize
    }
}

/// Category of object a shape describes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InstanceType {
    /// Ordinary object
    #[default]
    Object,
    /// Array exotic object
    Array,
    /// Function object
    Function,
    /// Error instance
    Error,
}

/// Host identity of the constructor that created a root shape
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConstructorId(pub u32);

/// Who may mutate a shared descriptor table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorOwnership {
    /// This shape may append to and replace entries of its table
    Owner,
    /// The table belongs to another shape; this shape only reads its prefix
    Reference(ShapeId),
}

/// Lifecycle of a shape
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeState {
    /// Objects may use this shape
    Live,
    /// Superseded; objects must move to a replacement on next access.
    /// The replacement is filled in lazily once found.
    Deprecated {
        /// Cached live replacement
        successor: Option<ShapeId>,
    },
}

/// Integrity level reached through a special transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntegrityLevel {
    /// `Object.preventExtensions`
    NonExtensible,
    /// `Object.seal`
    Sealed,
    /// `Object.freeze`
    Frozen,
}

/// Boolean shape flags
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShapeFlags {
    /// Named properties live in a property dictionary
    pub dictionary: bool,
    /// New properties may be added
    pub extensible: bool,
    /// Every property is sealed
    pub sealed: bool,
    /// Every property is frozen
    pub frozen: bool,
    /// No generalizing mutation has been observed through this shape
    pub stable: bool,
}

impl Default for ShapeFlags {
    fn default() -> Self {
        Self {
            dictionary: false,
            extensible: true,
            sealed: false,
            frozen: false,
            stable: true,
        }
    }
}

/// Storage class of a transition edge.
///
/// Field transitions are split by whether the field stores unboxed doubles,
/// so a `Smi` child and a `Double` child of the same key are siblings. A
/// linked child never changes class: in-place generalization never crosses
/// into `Double` and constants never change in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransitionStorage {
    /// Field with a non-double representation
    TaggedField,
    /// Field holding doubles
    DoubleField,
    /// Constant data property
    Constant,
    /// Accessor property
    Accessor,
}

impl TransitionStorage {
    /// Classes whose children may hold a property of this class, best first
    pub fn candidates(self) -> &'static [TransitionStorage] {
        use TransitionStorage::*;
        match self {
            TaggedField => &[TaggedField, DoubleField],
            DoubleField => &[DoubleField, TaggedField],
            Constant => &[Constant, TaggedField, DoubleField],
            Accessor => &[Accessor],
        }
    }
}

/// Identifies a property transition edge
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransitionKey {
    /// Added property name
    pub key: PropertyKey,
    /// Storage class of the added property
    pub storage: TransitionStorage,
    /// Attributes of the added property
    pub attributes: PropertyAttributes,
}

impl TransitionKey {
    /// Create a transition key
    pub fn new(key: PropertyKey, storage: TransitionStorage, attributes: PropertyAttributes) -> Self {
        Self {
            key: key.to_cacheable(),
            storage,
            attributes,
        }
    }
}

/// Outgoing edges of a shape
#[derive(Clone, Debug, Default)]
pub struct TransitionTable {
    /// Property additions
    properties: FxHashMap<TransitionKey, ShapeId>,
    /// The single elements-kind edge
    elements: Option<ShapeId>,
    /// Integrity level edges
    integrity: SmallVec<[(IntegrityLevel, ShapeId); 2]>,
    /// Small FIFO cache of prototype transitions
    prototypes: SmallVec<[(Option<ObjectId>, ShapeId); PROTOTYPE_TRANSITION_CACHE_SIZE]>,
}

impl TransitionTable {
    /// Look up a property transition
    pub fn find(&self, key: &TransitionKey) -> Option<ShapeId> {
        self.properties.get(key).copied()
    }

    /// Insert or overwrite a property transition
    pub(crate) fn insert(&mut self, key: TransitionKey, target: ShapeId) {
        self.properties.insert(key, target);
    }

    /// Number of property transitions
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// All property transitions
    pub fn property_targets(&self) -> impl Iterator<Item = (&TransitionKey, ShapeId)> {
        self.properties.iter().map(|(k, v)| (k, *v))
    }

    /// The elements-kind edge
    pub fn elements_target(&self) -> Option<ShapeId> {
        self.elements
    }

    pub(crate) fn set_elements_target(&mut self, target: ShapeId) {
        self.elements = Some(target);
    }

    /// Integrity-level edge
    pub fn integrity_target(&self, level: IntegrityLevel) -> Option<ShapeId> {
        self.integrity
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, s)| *s)
    }

    pub(crate) fn set_integrity_target(&mut self, level: IntegrityLevel, target: ShapeId) {
        self.integrity.retain(|(l, _)| *l != level);
        self.integrity.push((level, target));
    }

    /// Cached prototype transition
    pub fn prototype_target(&self, prototype: Option<ObjectId>) -> Option<ShapeId> {
        self.prototypes
            .iter()
            .find(|(p, _)| *p == prototype)
            .map(|(_, s)| *s)
    }

    pub(crate) fn cache_prototype_target(&mut self, prototype: Option<ObjectId>, target: ShapeId) {
        if self.prototypes.len() == PROTOTYPE_TRANSITION_CACHE_SIZE {
            self.prototypes.remove(0);
        }
        self.prototypes.push((prototype, target));
    }

    /// Every child that hangs below this shape in the tree (property and
    /// elements edges; integrity and prototype targets are detached roots)
    pub fn tree_children(&self) -> impl Iterator<Item = ShapeId> + '_ {
        self.properties.values().copied().chain(self.elements)
    }
}

/// Where a field lives in an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldIndex {
    /// Inline slot
    InObject(u32),
    /// Slot of the out-of-line field array
    OutOfLine(u32),
}

impl FieldIndex {
    /// Map a field index to its slot given the inline capacity
    pub fn for_field(index: u32, in_object_properties: u32) -> Self {
        if index < in_object_properties {
            Self::InObject(index)
        } else {
            Self::OutOfLine(index - in_object_properties)
        }
    }
}

/// A hidden class.
#[derive(Clone, Debug)]
pub struct ShapeRecord {
    pub(crate) instance_type: InstanceType,
    pub(crate) constructor: Option<ConstructorId>,
    pub(crate) prototype: Option<ObjectId>,
    /// Instance size in bytes (header + inline slots)
    pub(crate) instance_size: u32,
    pub(crate) in_object_properties: u32,
    /// Free inline slots, or free out-of-line slots once inline is full
    pub(crate) unused_property_fields: u32,
    pub(crate) descriptors: DescriptorTableId,
    pub(crate) own_descriptors: u32,
    pub(crate) ownership: DescriptorOwnership,
    pub(crate) back_pointer: Option<ShapeId>,
    pub(crate) transitions: TransitionTable,
    pub(crate) elements_kind: ElementsKind,
    pub(crate) flags: ShapeFlags,
    pub(crate) state: ShapeState,
    /// For dictionary shapes: the fast root replayed by `transform_to_fast`
    pub(crate) fast_root: Option<ShapeId>,
}

impl ShapeRecord {
    /// Object category
    pub fn instance_type(&self) -> InstanceType {
        self.instance_type
    }

    /// Constructor identity of the tree this shape belongs to
    pub fn constructor(&self) -> Option<ConstructorId> {
        self.constructor
    }

    /// Prototype of objects with this shape
    pub fn prototype(&self) -> Option<ObjectId> {
        self.prototype
    }

    /// Instance size in bytes
    pub fn instance_size(&self) -> u32 {
        self.instance_size
    }

    /// Inline slot capacity
    pub fn in_object_properties(&self) -> u32 {
        self.in_object_properties
    }

    /// Free slots (inline first, then out-of-line)
    pub fn unused_property_fields(&self) -> u32 {
        self.unused_property_fields
    }

    /// Descriptor table this shape reads
    pub fn descriptors(&self) -> DescriptorTableId {
        self.descriptors
    }

    /// Length of the table prefix this shape sees
    pub fn own_descriptors(&self) -> usize {
        self.own_descriptors as usize
    }

    /// Descriptor table ownership
    pub fn ownership(&self) -> DescriptorOwnership {
        self.ownership
    }

    /// Does this shape own its descriptor table
    pub fn owns_descriptors(&self) -> bool {
        self.ownership == DescriptorOwnership::Owner
    }

    /// Parent in the transition tree
    pub fn back_pointer(&self) -> Option<ShapeId> {
        self.back_pointer
    }

    /// Outgoing transitions
    pub fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    /// Elements kind of objects with this shape
    pub fn elements_kind(&self) -> ElementsKind {
        self.elements_kind
    }

    /// Flags
    pub fn flags(&self) -> ShapeFlags {
        self.flags
    }

    /// Lifecycle state
    pub fn state(&self) -> ShapeState {
        self.state
    }

    /// Named properties are in dictionary mode
    pub fn is_dictionary(&self) -> bool {
        self.flags.dictionary
    }

    /// Shape has been superseded
    pub fn is_deprecated(&self) -> bool {
        matches!(self.state, ShapeState::Deprecated { .. })
    }

    /// Shape is live and has not seen a generalizing mutation
    pub fn is_stable(&self) -> bool {
        self.flags.stable && !self.is_deprecated()
    }

    /// Shape can still gain properties
    pub fn is_extensible(&self) -> bool {
        self.flags.extensible
    }

    /// Shape heads a transition tree: no parent and no descriptors
    pub fn is_tree_root(&self) -> bool {
        self.back_pointer.is_none() && self.own_descriptors == 0 && !self.flags.dictionary
    }

    /// Out-of-line slots in use, given the number of fields
    pub fn out_of_line_used(&self, number_of_fields: u32) -> u32 {
        number_of_fields.saturating_sub(self.in_object_properties)
    }

    /// Length of the out-of-line field array objects with this shape carry
    pub fn out_of_line_capacity(&self, number_of_fields: u32) -> u32 {
        let used = self.out_of_line_used(number_of_fields);
        if number_of_fields >= self.in_object_properties {
            used + self.unused_property_fields
        } else {
            0
        }
    }

    /// `unused_property_fields` after one more field is added
    pub(crate) fn unused_after_adding_field(&self, number_of_fields: u32, slack: u32) -> u32 {
        if number_of_fields < self.in_object_properties {
            self.in_object_properties - number_of_fields - 1
        } else if self.unused_property_fields == 0 {
            slack.saturating_sub(1)
        } else {
            self.unused_property_fields - 1
        }
    }

    /// Would two shapes be interchangeable as transition-tree roots
    pub fn equivalent_for_transition(&self, other: &ShapeRecord) -> bool {
        self.instance_type == other.instance_type
            && self.constructor == other.constructor
            && self.prototype == other.prototype
            && self.in_object_properties == other.in_object_properties
            && self.flags.extensible == other.flags.extensible
            && self.flags.sealed == other.flags.sealed
            && self.flags.frozen == other.flags.frozen
            && self.flags.dictionary == other.flags.dictionary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_id_roundtrips_index() {
        let id = ShapeId::from_index(41);
        assert_eq!(id.index(), 41);
        assert_eq!(ShapeId::from_index(0).index(), 0);
        assert_eq!(std::mem::size_of::<Option<ShapeId>>(), 4);
    }

    #[test]
    fn test_field_index_split() {
        assert_eq!(FieldIndex::for_field(2, 4), FieldIndex::InObject(2));
        assert_eq!(FieldIndex::for_field(5, 4), FieldIndex::OutOfLine(1));
        assert_eq!(FieldIndex::for_field(0, 0), FieldIndex::OutOfLine(0));
    }

    #[test]
    fn test_prototype_cache_is_bounded() {
        let mut table = TransitionTable::default();
        for i in 0..6 {
            table.cache_prototype_target(
                Some(ObjectId::from_index(i)),
                ShapeId::from_index(i + 10),
            );
        }
        assert_eq!(table.prototype_target(Some(ObjectId::from_index(0))), None);
        assert_eq!(
            table.prototype_target(Some(ObjectId::from_index(5))),
            Some(ShapeId::from_index(15))
        );
    }
}
