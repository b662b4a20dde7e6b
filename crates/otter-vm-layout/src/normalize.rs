//! Storage mode controller for named properties
//!
//! `normalize` moves an object's named properties into a property
//! dictionary and gives it a dictionary shape; `transform_to_fast` goes the
//! other way. Dictionary shapes carry no descriptors, so objects with the
//! same structure share one through a small direct-mapped cache.

use crate::context::{LayoutContext, instance_size_for};
use crate::descriptors::{Descriptor, DescriptorDetails, DescriptorTable};
use crate::dictionary::PropertyDictionary;
use crate::elements::ElementsKind;
use crate::error::{LayoutError, LayoutResult};
use crate::field_type::FieldType;
use crate::memory::{BOXED_DOUBLE_SIZE, BarrierSlot, TAGGED_SIZE};
use crate::object::{FieldSlot, PropertyStorage};
use crate::property::{PropertyAttributes, PropertyKey, PropertyValue};
use crate::representation::Representation;
use crate::shape::{
    ConstructorId, DescriptorOwnership, FieldIndex, InstanceType, ShapeId, ShapeRecord,
    ShapeState, TransitionStorage, TransitionTable,
};
use crate::value::{ObjectId, Value};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// What happens to the inline field region when an object normalizes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NormalizationMode {
    /// Keep the inline region (unused while in dictionary mode)
    KeepInObjectProperties,
    /// Give the inline region back
    ClearInObjectProperties,
}

/// Everything a dictionary shape is determined by
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NormalizedKey {
    constructor: Option<ConstructorId>,
    prototype: Option<ObjectId>,
    instance_type: InstanceType,
    in_object_properties: u32,
    elements_kind: ElementsKind,
    extensible: bool,
    sealed: bool,
    frozen: bool,
    fast_root: Option<ShapeId>,
}

/// Direct-mapped cache of dictionary shapes.
///
/// A colliding insert evicts the previous entry; lookups compare the full
/// key, so a stale slot is a miss rather than a wrong answer.
#[derive(Debug)]
pub struct NormalizedShapeCache {
    entries: Vec<Option<(NormalizedKey, ShapeId)>>,
}

impl NormalizedShapeCache {
    /// Create a cache with `size` slots (at least one)
    pub fn new(size: usize) -> Self {
        Self {
            entries: vec![None; size.max(1)],
        }
    }

    fn slot(&self, key: &NormalizedKey) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.entries.len()
    }

    pub(crate) fn get(&self, key: &NormalizedKey) -> Option<ShapeId> {
        match &self.entries[self.slot(key)] {
            Some((cached, shape)) if cached == key => Some(*shape),
            _ => None,
        }
    }

    pub(crate) fn set(&mut self, key: NormalizedKey, shape: ShapeId) {
        let slot = self.slot(&key);
        self.entries[slot] = Some((key, shape));
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// No slot is occupied
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
    }
}

type Entries = Vec<(PropertyKey, PropertyValue, PropertyAttributes)>;

impl LayoutContext {
    /// Dictionary shape for objects leaving fast shape `fast`
    pub fn normalized_shape(&mut self, fast: ShapeId, mode: NormalizationMode) -> LayoutResult<ShapeId> {
        let record = self.check_shape(fast)?;
        let root = self.find_root(fast);
        let key = NormalizedKey {
            constructor: record.constructor,
            prototype: record.prototype,
            instance_type: record.instance_type,
            in_object_properties: match mode {
                NormalizationMode::KeepInObjectProperties => record.in_object_properties,
                NormalizationMode::ClearInObjectProperties => 0,
            },
            elements_kind: record.elements_kind,
            extensible: record.flags.extensible,
            sealed: record.flags.sealed,
            frozen: record.flags.frozen,
            fast_root: self.shape(root).is_tree_root().then_some(root),
        };
        let mut flags = record.flags;
        flags.dictionary = true;
        flags.stable = true;
        if let Some(cached) = self.normalized_cache.get(&key) {
            if !self.shape(cached).is_deprecated() {
                self.stats.normalized_cache_hits += 1;
                return Ok(cached);
            }
        }

        let table = self.alloc_table(DescriptorTable::new())?;
        let shape = self.alloc_shape(ShapeRecord {
            instance_type: key.instance_type,
            constructor: key.constructor,
            prototype: key.prototype,
            instance_size: instance_size_for(key.in_object_properties),
            in_object_properties: key.in_object_properties,
            unused_property_fields: 0,
            descriptors: table,
            own_descriptors: 0,
            ownership: DescriptorOwnership::Owner,
            back_pointer: None,
            transitions: TransitionTable::default(),
            elements_kind: key.elements_kind,
            flags,
            state: ShapeState::Live,
            fast_root: key.fast_root,
        })?;
        self.normalized_cache.set(key, shape);
        Ok(shape)
    }

    /// Move `obj`'s named properties into a property dictionary
    pub fn normalize(&mut self, obj: ObjectId, mode: NormalizationMode) -> LayoutResult<()> {
        self.normalize_for(obj, mode, "requested")
    }

    pub(crate) fn normalize_for(
        &mut self,
        obj: ObjectId,
        mode: NormalizationMode,
        reason: &'static str,
    ) -> LayoutResult<()> {
        let shape = self.ensure_current(obj)?;
        if self.shape(shape).is_dictionary() {
            return Ok(());
        }
        let properties = self.own_properties(obj)?;
        let target = self.normalized_shape(shape, mode)?;
        let mut dict = PropertyDictionary::with_capacity(properties.len(), self.config.max_enumeration_index);
        let mut references = false;
        for (key, value, attributes) in properties {
            references |= matches!(value, PropertyValue::Data(Value::Object(_) | Value::String(_)));
            dict.insert(key, value, attributes);
        }
        let count = dict.len();

        let in_object = self.shape(target).in_object_properties as usize;
        let object = &mut self.objects[obj.index()];
        let boxes = object.boxed_double_count();
        let out_of_line = object.out_of_line_slots().len();
        let inline_len = object.in_object.len();
        object.in_object = vec![FieldSlot::Uninitialized; in_object.min(inline_len)];
        object.properties = PropertyStorage::Dictionary(dict);
        self.memory
            .free(boxes * BOXED_DOUBLE_SIZE + out_of_line * TAGGED_SIZE);
        self.memory
            .create_filler(inline_len.saturating_sub(in_object) * TAGGED_SIZE);
        object.publish_shape(target);
        if references {
            self.memory.record_write(obj, BarrierSlot::Dictionary);
        }

        self.mark_unstable(shape);
        self.stats.normalizations += 1;
        tracing::debug!(
            target: "otter::layout",
            object = obj.index(),
            from = shape.index(),
            to = target.index(),
            properties = count,
            ?mode,
            reason,
            "normalized object"
        );
        Ok(())
    }

    /// Move a dictionary-mode object back to fast properties.
    ///
    /// Returns `false` when the object is already fast or has too many
    /// properties. The object's original transition tree is reused when it
    /// still has compatible shapes for the properties in enumeration order;
    /// otherwise a detached shape with `Tagged` fields is built.
    pub fn transform_to_fast(&mut self, obj: ObjectId) -> LayoutResult<bool> {
        let shape = self.object_shape(obj)?;
        if !self.shape(shape).is_dictionary() {
            return Ok(false);
        }
        let object = &self.objects[obj.index()];
        let Some(dict) = object.property_dictionary() else {
            return Err(LayoutError::invariant(format!(
                "{obj:?} has dictionary shape {shape:?} but fast storage"
            )));
        };
        if dict.len() > self.config.max_fast_properties_for_transform {
            return Ok(false);
        }
        let inline_len = object.in_object.len();
        let entries: Entries = dict
            .iter_enumeration_order()
            .into_iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.attributes))
            .collect();

        let target = match self.replay_dictionary(shape, &entries, inline_len)? {
            Some(target) => {
                self.stats.fast_replays += 1;
                target
            }
            None => self.synthesize_fast_shape(shape, &entries)?,
        };
        self.install_fast_storage(obj, target, &entries)?;
        self.stats.fast_conversions += 1;
        tracing::debug!(
            target: "otter::layout",
            object = obj.index(),
            from = shape.index(),
            to = target.index(),
            properties = entries.len(),
            "transformed object to fast properties"
        );
        Ok(true)
    }

    /// Walk existing transitions from the dictionary shape's fast root
    fn replay_dictionary(
        &mut self,
        dictionary: ShapeId,
        entries: &Entries,
        inline_len: usize,
    ) -> LayoutResult<Option<ShapeId>> {
        let record = self.shape(dictionary);
        let Some(root) = record.fast_root else {
            return Ok(None);
        };
        let (kind, flags) = (record.elements_kind, record.flags);
        if !flags.extensible
            || flags.sealed
            || flags.frozen
            || self.shape(root).is_deprecated()
            || self.shape(root).in_object_properties as usize > inline_len
        {
            return Ok(None);
        }
        let mut current = self.transition_array_kind(root, kind)?;
        for (i, (key, value, attributes)) in entries.iter().enumerate() {
            let classes: &[TransitionStorage] = match value {
                PropertyValue::Accessor(_) => TransitionStorage::Accessor.candidates(),
                PropertyValue::Data(v) if v.optimal_representation().is_double() => {
                    &[TransitionStorage::DoubleField, TransitionStorage::TaggedField, TransitionStorage::Constant]
                }
                PropertyValue::Data(_) => {
                    &[TransitionStorage::TaggedField, TransitionStorage::DoubleField, TransitionStorage::Constant]
                }
            };
            let step = self
                .transition_candidates(current, key, *attributes, classes)
                .into_iter()
                .find(|next| match (&self.descriptor(*next, i).details, value) {
                    (
                        DescriptorDetails::Field {
                            representation,
                            field_type,
                            ..
                        },
                        PropertyValue::Data(v),
                    ) => self.value_fits_field(v, *representation, field_type),
                    (DescriptorDetails::Constant(c), PropertyValue::Data(v)) => c.same_value(v),
                    (DescriptorDetails::Accessor(p), PropertyValue::Accessor(q)) => p == q,
                    _ => false,
                });
            let Some(next) = step else {
                return Ok(None);
            };
            current = next;
        }
        Ok(Some(current))
    }

    /// Detached fast shape with one `Tagged` field per data entry, in
    /// enumeration order
    fn synthesize_fast_shape(&mut self, dictionary: ShapeId, entries: &Entries) -> LayoutResult<ShapeId> {
        let mut descriptors = Vec::with_capacity(entries.len());
        let mut nof = 0;
        for (key, value, attributes) in entries {
            descriptors.push(match value {
                PropertyValue::Data(_) => {
                    nof += 1;
                    Descriptor::field(key.clone(), *attributes, nof - 1, Representation::Tagged, FieldType::Any)
                }
                PropertyValue::Accessor(pair) => Descriptor::accessor(key.clone(), *attributes, pair.clone()),
            });
        }
        let mut record = self.derive_child(dictionary);
        record.descriptors = self.alloc_table(DescriptorTable::from_descriptors(descriptors))?;
        record.own_descriptors = entries.len() as u32;
        record.ownership = DescriptorOwnership::Owner;
        record.unused_property_fields = record.in_object_properties.saturating_sub(nof);
        record.flags.dictionary = false;
        record.fast_root = None;
        self.alloc_shape(record)
    }

    fn install_fast_storage(&mut self, obj: ObjectId, target: ShapeId, entries: &Entries) -> LayoutResult<()> {
        let record = self.shape(target);
        let in_object = record.in_object_properties;
        let capacity = record.out_of_line_capacity(self.number_of_fields(target)) as usize;
        let inline_len = self.objects[obj.index()].in_object.len();
        if in_object as usize > inline_len {
            return Err(LayoutError::invariant(format!(
                "{obj:?} has {inline_len} inline slots, {target:?} needs {in_object}"
            )));
        }

        let mut reservation = self.memory.reserve();
        reservation.alloc(capacity * TAGGED_SIZE)?;
        let mut inline = vec![FieldSlot::Uninitialized; in_object as usize];
        let mut out_of_line = vec![FieldSlot::Uninitialized; capacity];
        let mut barrier = Vec::new();
        for (descriptor, (_, value, _)) in self.descriptors(target).iter().zip(entries) {
            let DescriptorDetails::Field {
                index,
                representation,
                ..
            } = &descriptor.details
            else {
                continue;
            };
            let PropertyValue::Data(value) = value else {
                continue;
            };
            let slot = FieldSlot::encode(value, *representation);
            if slot.is_boxed_double() {
                reservation.alloc(BOXED_DOUBLE_SIZE)?;
            }
            let location = FieldIndex::for_field(*index, in_object);
            if slot.is_reference() {
                barrier.push(match location {
                    FieldIndex::InObject(i) => BarrierSlot::InObject(i),
                    FieldIndex::OutOfLine(i) => BarrierSlot::OutOfLine(i),
                });
            }
            match location {
                FieldIndex::InObject(i) => inline[i as usize] = slot,
                FieldIndex::OutOfLine(i) => out_of_line[i as usize] = slot,
            }
        }
        reservation.commit();

        let object = &mut self.objects[obj.index()];
        object.in_object = inline;
        object.properties = PropertyStorage::OutOfLine(out_of_line);
        self.memory
            .create_filler((inline_len - in_object as usize) * TAGGED_SIZE);
        object.publish_shape(target);
        for slot in barrier {
            self.memory.record_write(obj, slot);
        }
        Ok(())
    }
}
