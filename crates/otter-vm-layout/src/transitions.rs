//! Transition tree operations
//!
//! Adding a property to a shape either reuses the matching child or
//! allocates one. A new child shares the parent's descriptor table when the
//! parent owns it (the table is extended in place and ownership moves to the
//! child) and branches a copy otherwise.

use crate::context::LayoutContext;
use crate::descriptors::{Descriptor, DescriptorDetails, DescriptorTable};
use crate::error::{LayoutError, LayoutResult};
use crate::field_type::FieldType;
use crate::generalize::widen_all_fields;
use crate::memory::DESCRIPTOR_ENTRY_SIZE;
use crate::property::{AccessorPair, PropertyAttributes, PropertyKey, PropertyKind};
use crate::representation::Representation;
use crate::shape::{
    DescriptorOwnership, FieldIndex, IntegrityLevel, ShapeFlags, ShapeId, ShapeRecord, ShapeState,
    TransitionKey, TransitionStorage, TransitionTable,
};
use crate::value::{ObjectId, Value};
use smallvec::SmallVec;

/// Storage requested for a property being added
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyDetails {
    /// Slot-backed data property
    Field {
        /// Initial representation
        representation: Representation,
        /// Initial field type
        field_type: FieldType,
    },
    /// Value kept in the descriptor
    Constant(Value),
    /// Accessor pair kept in the descriptor
    Accessor(AccessorPair),
}

impl PropertyDetails {
    /// Storage class keying the transition that adds these details
    pub fn storage(&self) -> TransitionStorage {
        match self {
            Self::Field { representation, .. } if representation.is_double() => {
                TransitionStorage::DoubleField
            }
            Self::Field { .. } => TransitionStorage::TaggedField,
            Self::Constant(_) => TransitionStorage::Constant,
            Self::Accessor(_) => TransitionStorage::Accessor,
        }
    }

    /// Details that recreate `descriptor` on a new transition
    pub(crate) fn from_descriptor(descriptor: &Descriptor) -> Self {
        match &descriptor.details {
            DescriptorDetails::Field {
                representation,
                field_type,
                ..
            } => Self::Field {
                representation: *representation,
                field_type: field_type.clone(),
            },
            DescriptorDetails::Constant(value) => Self::Constant(value.clone()),
            DescriptorDetails::Accessor(pair) => Self::Accessor(pair.clone()),
        }
    }

    fn into_descriptor(self, key: PropertyKey, attributes: PropertyAttributes, field_index: u32) -> Descriptor {
        match self {
            Self::Field {
                representation,
                field_type,
            } => Descriptor::field(key, attributes, field_index, representation, field_type),
            Self::Constant(value) => Descriptor::constant(key, attributes, value),
            Self::Accessor(pair) => Descriptor::accessor(key, attributes, pair),
        }
    }
}

/// Result of looking a name up in a shape
#[derive(Clone, Debug, PartialEq)]
pub enum LookupResult {
    /// Stored in an object slot
    Field {
        /// Slot location
        index: FieldIndex,
        /// Storage representation
        representation: Representation,
    },
    /// Same value for every object with the shape
    Constant(Value),
    /// Accessor pair
    Accessor(AccessorPair),
    /// No own property with that name
    NotFound,
}

impl LayoutContext {
    /// Fresh record that copies `parent`'s layout with no transitions and
    /// no parent
    pub(crate) fn derive_child(&self, parent: ShapeId) -> ShapeRecord {
        let p = self.shape(parent);
        ShapeRecord {
            instance_type: p.instance_type,
            constructor: p.constructor,
            prototype: p.prototype,
            instance_size: p.instance_size,
            in_object_properties: p.in_object_properties,
            unused_property_fields: p.unused_property_fields,
            descriptors: p.descriptors,
            own_descriptors: p.own_descriptors,
            ownership: p.ownership,
            back_pointer: None,
            transitions: TransitionTable::default(),
            elements_kind: p.elements_kind,
            flags: ShapeFlags {
                stable: true,
                ..p.flags
            },
            state: ShapeState::Live,
            fast_root: p.fast_root,
        }
    }

    /// Detached copy of `shape` with its own copy of the visible descriptors
    pub(crate) fn copy_detached(
        &mut self,
        shape: ShapeId,
        edit: impl FnOnce(&mut ShapeRecord),
    ) -> LayoutResult<ShapeId> {
        let mut record = self.derive_child(shape);
        let table = self
            .table(record.descriptors)
            .copy_up_to(record.own_descriptors(), 0);
        record.descriptors = self.alloc_table(table)?;
        record.ownership = DescriptorOwnership::Owner;
        edit(&mut record);
        self.alloc_shape(record)
    }

    /// Descriptor index of `key` in `shape`
    pub fn search_descriptor(&self, shape: ShapeId, key: &PropertyKey) -> Option<usize> {
        let record = self.shape(shape);
        if record.is_dictionary() {
            return None;
        }
        self.table(record.descriptors)
            .search(key, record.own_descriptors())
    }

    /// Where objects of `shape` keep `key`.
    ///
    /// Dictionary shapes carry no descriptors and always report `NotFound`;
    /// their properties live in the object's dictionary.
    pub fn lookup(&self, shape: ShapeId, key: &PropertyKey) -> LookupResult {
        let Some(descriptor) = self.search_descriptor(shape, key) else {
            return LookupResult::NotFound;
        };
        let in_object = self.shape(shape).in_object_properties;
        match &self.descriptor(shape, descriptor).details {
            DescriptorDetails::Field {
                index,
                representation,
                ..
            } => LookupResult::Field {
                index: FieldIndex::for_field(*index, in_object),
                representation: *representation,
            },
            DescriptorDetails::Constant(value) => LookupResult::Constant(value.clone()),
            DescriptorDetails::Accessor(pair) => LookupResult::Accessor(pair.clone()),
        }
    }

    /// Existing child of `shape` that added `key` with the given storage
    /// class and attributes
    pub fn find_transition(
        &self,
        shape: ShapeId,
        key: &PropertyKey,
        storage: TransitionStorage,
        attributes: PropertyAttributes,
    ) -> Option<ShapeId> {
        self.shape(shape)
            .transitions
            .find(&TransitionKey::new(key.clone(), storage, attributes))
    }

    /// Live children of `shape` that added `key` under any of `classes`,
    /// in the order the classes are given
    pub(crate) fn transition_candidates(
        &self,
        shape: ShapeId,
        key: &PropertyKey,
        attributes: PropertyAttributes,
        classes: &[TransitionStorage],
    ) -> SmallVec<[ShapeId; 3]> {
        classes
            .iter()
            .filter_map(|storage| self.find_transition(shape, key, *storage, attributes))
            .filter(|child| !self.shape(*child).is_deprecated())
            .collect()
    }

    /// Shape of objects of `shape` after adding `key`.
    ///
    /// Returns the existing child when one matches `(key, storage class,
    /// attributes)`. A `Double` field and a `Smi` field of the same key are
    /// siblings, so asking for one never hands out the other. When the
    /// matching child has been deprecated, a live sibling whose descriptor
    /// accommodates the request is reused instead of allocating again.
    /// Keys that cannot be cached, full transition tables and full
    /// descriptor tables produce detached shapes that are not linked into
    /// the tree; at the descriptor limit every field is also widened.
    pub fn add_transition(
        &mut self,
        shape: ShapeId,
        key: PropertyKey,
        attributes: PropertyAttributes,
        details: PropertyDetails,
    ) -> LayoutResult<ShapeId> {
        let record = self.check_shape(shape)?;
        if record.is_dictionary() {
            return Err(LayoutError::DictionaryMode(shape));
        }
        debug_assert!(!record.is_deprecated(), "transition from deprecated {shape:?}");
        debug_assert!(
            self.search_descriptor(shape, &key).is_none(),
            "{key} already present in {shape:?}"
        );

        let storage = details.storage();
        let transition_key = TransitionKey::new(key.clone(), storage, attributes);
        let cacheable = key.is_cacheable();
        if cacheable {
            if let Some(existing) = record.transitions.find(&transition_key) {
                if !self.shape(existing).is_deprecated() {
                    self.stats.transitions_reused += 1;
                    return Ok(existing);
                }
                // a deprecated child is never handed out again
                let own = record.own_descriptors();
                let wanted = details.clone().into_descriptor(key.clone(), attributes, 0);
                let sibling = self
                    .transition_candidates(shape, &key, attributes, &storage.candidates()[1..])
                    .into_iter()
                    .find(|child| self.descriptor(*child, own).accommodates(&wanted));
                if let Some(sibling) = sibling {
                    self.stats.transitions_reused += 1;
                    return Ok(sibling);
                }
            }
        }

        let own = record.own_descriptors();
        let table_id = record.descriptors;
        let nof = self.number_of_fields(shape);
        let is_field = matches!(details, PropertyDetails::Field { .. });
        let unused = if is_field {
            record.unused_after_adding_field(nof, self.config.out_of_line_slack)
        } else {
            record.unused_property_fields
        };
        let at_capacity = own >= self.config.max_descriptors;
        let linked = cacheable
            && !at_capacity
            && record.transitions.property_count() < self.config.max_transitions;
        let share = linked && record.owns_descriptors() && self.table(table_id).len() == own;

        let descriptor = details.into_descriptor(key.clone(), attributes, nof);
        let mut child = self.derive_child(shape);
        child.own_descriptors = own as u32 + 1;
        child.unused_property_fields = unused;
        child.ownership = DescriptorOwnership::Owner;
        if linked {
            child.back_pointer = Some(shape);
        }

        let target = if share {
            self.memory.alloc(DESCRIPTOR_ENTRY_SIZE)?;
            let target = match self.alloc_shape(child) {
                Ok(target) => target,
                Err(err) => {
                    self.memory.free(DESCRIPTOR_ENTRY_SIZE);
                    return Err(err);
                }
            };
            self.table_mut(table_id).append(descriptor);
            self.shape_mut(shape).ownership = DescriptorOwnership::Reference(target);
            self.stats.transitions_shared += 1;
            target
        } else {
            let table = if at_capacity {
                let mut entries = self.descriptors(shape).to_vec();
                entries.push(descriptor);
                DescriptorTable::from_descriptors(widen_all_fields(&entries, None))
            } else {
                let mut table = self.table(table_id).copy_up_to(own, 1);
                table.append(descriptor);
                table
            };
            child.descriptors = self.alloc_table(table)?;
            let target = self.alloc_shape(child)?;
            self.stats.transitions_branched += 1;
            target
        };

        if linked {
            self.shape_mut(shape)
                .transitions
                .insert(transition_key, target);
        }
        if at_capacity {
            self.stats.full_generalizations += 1;
            self.mark_unstable(shape);
        }
        tracing::debug!(
            target: "otter::layout",
            parent = shape.index(),
            child = target.index(),
            key = %key,
            shared = share,
            linked,
            "added transition"
        );
        Ok(target)
    }

    /// Shape like `shape` but for objects with a different prototype.
    ///
    /// Results are kept in a small per-shape cache.
    pub fn transition_to_prototype(
        &mut self,
        shape: ShapeId,
        prototype: Option<ObjectId>,
    ) -> LayoutResult<ShapeId> {
        let record = self.check_shape(shape)?;
        if record.prototype == prototype {
            return Ok(shape);
        }
        if let Some(cached) = record.transitions.prototype_target(prototype) {
            if !self.shape(cached).is_deprecated() {
                return Ok(cached);
            }
        }
        let pristine_root = record.is_tree_root()
            && ShapeFlags {
                stable: true,
                ..record.flags
            } == ShapeFlags::default()
            && record.elements_kind == Default::default();
        let target = if pristine_root {
            let (constructor, instance_type, in_object) = (
                record.constructor,
                record.instance_type,
                record.in_object_properties,
            );
            self.initial_shape(constructor, prototype, instance_type, in_object)?
        } else {
            self.copy_detached(shape, |r| r.prototype = prototype)?
        };
        self.shape_mut(shape)
            .transitions
            .cache_prototype_target(prototype, target);
        tracing::debug!(
            target: "otter::layout",
            from = shape.index(),
            to = target.index(),
            "prototype transition"
        );
        Ok(target)
    }

    /// `Object.preventExtensions` at the shape level
    pub fn prevent_extensions(&mut self, shape: ShapeId) -> LayoutResult<ShapeId> {
        self.integrity_transition(shape, IntegrityLevel::NonExtensible)
    }

    /// `Object.seal` at the shape level
    pub fn seal(&mut self, shape: ShapeId) -> LayoutResult<ShapeId> {
        self.integrity_transition(shape, IntegrityLevel::Sealed)
    }

    /// `Object.freeze` at the shape level
    pub fn freeze(&mut self, shape: ShapeId) -> LayoutResult<ShapeId> {
        self.integrity_transition(shape, IntegrityLevel::Frozen)
    }

    /// Detached copy of `shape` at the given integrity level, cached on the
    /// shape's special transition edge
    pub fn integrity_transition(
        &mut self,
        shape: ShapeId,
        level: IntegrityLevel,
    ) -> LayoutResult<ShapeId> {
        let record = self.check_shape(shape)?;
        let flags = record.flags;
        let reached = match level {
            IntegrityLevel::NonExtensible => !flags.extensible,
            IntegrityLevel::Sealed => !flags.extensible && (flags.sealed || flags.frozen),
            IntegrityLevel::Frozen => !flags.extensible && flags.frozen,
        };
        if reached {
            return Ok(shape);
        }
        if let Some(cached) = record.transitions.integrity_target(level) {
            if !self.shape(cached).is_deprecated() {
                return Ok(cached);
            }
        }

        let target = self.copy_detached(shape, |r| {
            r.flags.extensible = false;
            r.flags.sealed |= level != IntegrityLevel::NonExtensible;
            r.flags.frozen |= level == IntegrityLevel::Frozen;
        })?;
        if level != IntegrityLevel::NonExtensible {
            let table_id = self.shape(target).descriptors;
            for i in 0..self.shape(target).own_descriptors() {
                let mut descriptor = self.table(table_id).get(i).clone();
                descriptor.attributes = match (level, descriptor.kind()) {
                    (IntegrityLevel::Frozen, PropertyKind::Data) => descriptor.attributes.frozen(),
                    _ => descriptor.attributes.sealed(),
                };
                self.table_mut(table_id).replace(i, descriptor);
            }
        }
        self.shape_mut(shape)
            .transitions
            .set_integrity_target(level, target);
        tracing::debug!(
            target: "otter::layout",
            from = shape.index(),
            to = target.index(),
            ?level,
            "integrity level transition"
        );
        Ok(target)
    }
}
