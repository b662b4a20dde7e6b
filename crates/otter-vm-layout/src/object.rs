//! Heap objects and the property-access surface
//!
//! An object stores a published shape handle, an inline field region sized
//! by the shape's in-object capacity, and either an out-of-line field array
//! (fast mode) or a property dictionary (dictionary mode). Indexed elements
//! live in a separate [`ElementsStore`].

use crate::context::LayoutContext;
use crate::descriptors::DescriptorDetails;
use crate::dictionary::PropertyDictionary;
use crate::elements::ElementsStore;
use crate::error::{LayoutError, LayoutResult};
use crate::field_type::FieldType;
use crate::memory::{BOXED_DOUBLE_SIZE, BarrierSlot, TAGGED_SIZE};
use crate::normalize::NormalizationMode;
use crate::property::{AccessorPair, PropertyAttributes, PropertyKey, PropertyKind, PropertyValue};
use crate::representation::Representation;
use crate::shape::{FieldIndex, IntegrityLevel, ShapeId};
use crate::transitions::PropertyDetails;
use crate::value::{ObjectId, Value};
use std::sync::atomic::{AtomicU32, Ordering};

/// Contents of one field slot
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FieldSlot {
    /// Never written
    #[default]
    Uninitialized,
    /// Unboxed small integer
    Smi(i32),
    /// Mutable boxed double owned by this slot
    BoxedDouble(Box<f64>),
    /// Any other value
    Tagged(Value),
}

impl FieldSlot {
    /// Value stored in the slot (`undefined` when uninitialized)
    pub fn to_value(&self) -> Value {
        match self {
            Self::Uninitialized => Value::Undefined,
            Self::Smi(i) => Value::Smi(*i),
            Self::BoxedDouble(n) => Value::number(**n),
            Self::Tagged(value) => value.clone(),
        }
    }

    /// Slot holds a boxed double cell
    pub fn is_boxed_double(&self) -> bool {
        matches!(self, Self::BoxedDouble(_))
    }

    /// Initial contents of a field with the given representation
    pub(crate) fn default_for(representation: Representation) -> Self {
        if representation.is_double() {
            Self::BoxedDouble(Box::new(0.0))
        } else {
            Self::Uninitialized
        }
    }

    /// Encode a value for a field of the given representation.
    ///
    /// Callers only hand double fields numbers; anything else is kept
    /// tagged rather than silently turned into a number.
    pub(crate) fn encode(value: &Value, representation: Representation) -> Self {
        match (representation, value) {
            (Representation::Double, v) => match v.as_f64() {
                Some(number) => Self::BoxedDouble(Box::new(number)),
                None => {
                    debug_assert!(false, "{v:?} encoded for a double field");
                    Self::Tagged(v.clone())
                }
            },
            (_, Value::Smi(i)) => Self::Smi(*i),
            (_, v) => Self::Tagged(v.clone()),
        }
    }

    /// Could this slot belong to a field of the given representation
    pub fn fits(&self, representation: Representation) -> bool {
        match (self, representation) {
            (Self::BoxedDouble(_), r) => r.is_double(),
            (_, Representation::Double) => false,
            (Self::Uninitialized, _) => true,
            (_, Representation::None) => false,
            (Self::Smi(_), r) => r.is_smi() || r.is_tagged(),
            (Self::Tagged(v), r) => v.fits_representation(r),
        }
    }

    /// Slot holds a reference the collector must see
    pub(crate) fn is_reference(&self) -> bool {
        matches!(self, Self::Tagged(Value::Object(_) | Value::String(_)))
    }
}

/// Named-property backing store
#[derive(Clone, Debug)]
pub enum PropertyStorage {
    /// Fields beyond the inline capacity (fast mode)
    OutOfLine(Vec<FieldSlot>),
    /// Dictionary mode
    Dictionary(PropertyDictionary),
}

/// One object in the layout heap
#[derive(Debug)]
pub struct HeapObject {
    /// Arena index of the published shape
    shape: AtomicU32,
    pub(crate) in_object: Vec<FieldSlot>,
    pub(crate) properties: PropertyStorage,
    pub(crate) elements: ElementsStore,
}

impl HeapObject {
    pub(crate) fn new(
        shape: ShapeId,
        in_object: Vec<FieldSlot>,
        properties: PropertyStorage,
        elements: ElementsStore,
    ) -> Self {
        Self {
            shape: AtomicU32::new(shape.index() as u32),
            in_object,
            properties,
            elements,
        }
    }

    /// Currently published shape (acquire load)
    pub fn shape(&self) -> ShapeId {
        ShapeId::from_index(self.shape.load(Ordering::Acquire))
    }

    /// Publish a new shape once the fields already match it
    pub(crate) fn publish_shape(&self, shape: ShapeId) {
        self.shape.store(shape.index() as u32, Ordering::Release);
    }

    /// Inline field region
    pub fn in_object_slots(&self) -> &[FieldSlot] {
        &self.in_object
    }

    /// Out-of-line field array (empty in dictionary mode)
    pub fn out_of_line_slots(&self) -> &[FieldSlot] {
        match &self.properties {
            PropertyStorage::OutOfLine(slots) => slots,
            PropertyStorage::Dictionary(_) => &[],
        }
    }

    /// Property dictionary, in dictionary mode
    pub fn property_dictionary(&self) -> Option<&PropertyDictionary> {
        match &self.properties {
            PropertyStorage::Dictionary(dict) => Some(dict),
            PropertyStorage::OutOfLine(_) => None,
        }
    }

    /// Indexed backing store
    pub fn elements(&self) -> &ElementsStore {
        &self.elements
    }

    /// Slot at a field location
    pub fn slot(&self, index: FieldIndex) -> Option<&FieldSlot> {
        match index {
            FieldIndex::InObject(i) => self.in_object.get(i as usize),
            FieldIndex::OutOfLine(i) => self.out_of_line_slots().get(i as usize),
        }
    }

    pub(crate) fn slot_mut(&mut self, index: FieldIndex) -> Option<&mut FieldSlot> {
        match index {
            FieldIndex::InObject(i) => self.in_object.get_mut(i as usize),
            FieldIndex::OutOfLine(i) => match &mut self.properties {
                PropertyStorage::OutOfLine(slots) => slots.get_mut(i as usize),
                PropertyStorage::Dictionary(_) => None,
            },
        }
    }

    /// Boxed double cells held by the named-property storage
    pub(crate) fn boxed_double_count(&self) -> usize {
        self.in_object
            .iter()
            .chain(self.out_of_line_slots())
            .filter(|slot| slot.is_boxed_double())
            .count()
    }
}

fn barrier_slot(index: FieldIndex) -> BarrierSlot {
    match index {
        FieldIndex::InObject(i) => BarrierSlot::InObject(i),
        FieldIndex::OutOfLine(i) => BarrierSlot::OutOfLine(i),
    }
}

impl LayoutContext {
    // ------------------------------------------------------------------
    // Allocation and access
    // ------------------------------------------------------------------

    /// Allocate an object with the given shape
    pub fn allocate_object(&mut self, shape: ShapeId) -> LayoutResult<ObjectId> {
        let shape = self.updated_shape(shape)?;
        let record = self.shape(shape);
        let in_object = record.in_object_properties;
        let instance_size = record.instance_size as usize;
        let dictionary = record.is_dictionary();
        let elements = ElementsStore::for_kind(record.elements_kind);

        let mut inline = vec![FieldSlot::Uninitialized; in_object as usize];
        let mut out_of_line = Vec::new();
        let mut boxes = 0;
        if !dictionary {
            let nof = self.number_of_fields(shape);
            out_of_line.resize(record.out_of_line_capacity(nof) as usize, FieldSlot::Uninitialized);
            for descriptor in self.descriptors(shape) {
                if let DescriptorDetails::Field {
                    index,
                    representation,
                    ..
                } = &descriptor.details
                {
                    if representation.is_double() {
                        boxes += 1;
                    }
                    let slot = FieldSlot::default_for(*representation);
                    match FieldIndex::for_field(*index, in_object) {
                        FieldIndex::InObject(i) => inline[i as usize] = slot,
                        FieldIndex::OutOfLine(i) => out_of_line[i as usize] = slot,
                    }
                }
            }
        }

        let mut reservation = self.memory.reserve();
        reservation.alloc(instance_size)?;
        reservation.alloc(out_of_line.len() * TAGGED_SIZE)?;
        reservation.alloc(boxes * BOXED_DOUBLE_SIZE)?;
        reservation.commit();

        let properties = if dictionary {
            PropertyStorage::Dictionary(PropertyDictionary::new(self.config.max_enumeration_index))
        } else {
            PropertyStorage::OutOfLine(out_of_line)
        };
        let id = ObjectId::from_index(self.objects.len() as u32);
        self.objects
            .push(HeapObject::new(shape, inline, properties, elements));
        Ok(id)
    }

    /// Object record for a handle
    pub fn object(&self, obj: ObjectId) -> LayoutResult<&HeapObject> {
        self.objects
            .get(obj.index())
            .ok_or(LayoutError::InvalidObject(obj))
    }

    /// Number of objects allocated in this context
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Published shape of an object
    pub fn object_shape(&self, obj: ObjectId) -> LayoutResult<ShapeId> {
        Ok(self.object(obj)?.shape())
    }

    /// Move an object off a deprecated shape. Returns the live shape.
    pub fn ensure_current(&mut self, obj: ObjectId) -> LayoutResult<ShapeId> {
        let shape = self.object_shape(obj)?;
        if !self.shape(shape).is_deprecated() {
            return Ok(shape);
        }
        let target = self.updated_shape(shape)?;
        self.migrate(obj, target)?;
        Ok(target)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Own named property
    pub fn get_property(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
    ) -> LayoutResult<Option<PropertyValue>> {
        let shape = self.ensure_current(obj)?;
        let object = &self.objects[obj.index()];
        if let Some(dict) = object.property_dictionary() {
            return Ok(dict.find(key).map(|entry| entry.value.clone()));
        }
        let Some(descriptor) = self.search_descriptor(shape, key) else {
            return Ok(None);
        };
        Ok(Some(self.descriptor_value(obj, shape, descriptor)?))
    }

    /// Attributes of an own named property
    pub fn get_attributes(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
    ) -> LayoutResult<Option<PropertyAttributes>> {
        let shape = self.ensure_current(obj)?;
        if let Some(dict) = self.objects[obj.index()].property_dictionary() {
            return Ok(dict.find(key).map(|entry| entry.attributes));
        }
        Ok(self
            .search_descriptor(shape, key)
            .map(|i| self.descriptor(shape, i).attributes))
    }

    /// Own property names in enumeration order
    pub fn own_keys(&mut self, obj: ObjectId) -> LayoutResult<Vec<PropertyKey>> {
        Ok(self
            .own_properties(obj)?
            .into_iter()
            .map(|(key, _, _)| key)
            .collect())
    }

    /// Own properties with values and attributes in enumeration order
    pub fn own_properties(
        &mut self,
        obj: ObjectId,
    ) -> LayoutResult<Vec<(PropertyKey, PropertyValue, PropertyAttributes)>> {
        let shape = self.ensure_current(obj)?;
        if let Some(dict) = self.objects[obj.index()].property_dictionary() {
            return Ok(dict
                .iter_enumeration_order()
                .into_iter()
                .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.attributes))
                .collect());
        }
        (0..self.shape(shape).own_descriptors())
            .map(|i| {
                let descriptor = self.descriptor(shape, i);
                let (key, attributes) = (descriptor.key.clone(), descriptor.attributes);
                Ok((key, self.descriptor_value(obj, shape, i)?, attributes))
            })
            .collect()
    }

    fn descriptor_value(
        &self,
        obj: ObjectId,
        shape: ShapeId,
        descriptor: usize,
    ) -> LayoutResult<PropertyValue> {
        let in_object = self.shape(shape).in_object_properties;
        Ok(match &self.descriptor(shape, descriptor).details {
            DescriptorDetails::Field { index, .. } => {
                let location = FieldIndex::for_field(*index, in_object);
                let slot = self.objects[obj.index()].slot(location).ok_or_else(|| {
                    LayoutError::invariant(format!("{obj:?} has no slot {location:?}"))
                })?;
                PropertyValue::Data(slot.to_value())
            }
            DescriptorDetails::Constant(value) => PropertyValue::Data(value.clone()),
            DescriptorDetails::Accessor(pair) => PropertyValue::Accessor(pair.clone()),
        })
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// `obj[key] = value` for own data properties, adding the property
    /// when it does not exist
    pub fn set_property(&mut self, obj: ObjectId, key: PropertyKey, value: Value) -> LayoutResult<()> {
        let shape = self.ensure_current(obj)?;
        if self.shape(shape).is_dictionary() {
            let dict = self.dictionary_mut(obj)?;
            return match dict.find(&key) {
                Some(entry) if matches!(entry.value, PropertyValue::Accessor(_)) => {
                    Err(LayoutError::AccessorProperty(key))
                }
                Some(entry) if !entry.attributes.writable => Err(LayoutError::ReadOnly(key)),
                Some(_) => {
                    dict.update(&key, value);
                    Ok(())
                }
                None => self.add_property(obj, key, value, PropertyAttributes::data()),
            };
        }
        match self.search_descriptor(shape, &key) {
            Some(descriptor) => {
                let existing = self.descriptor(shape, descriptor);
                if existing.kind() == PropertyKind::Accessor {
                    return Err(LayoutError::AccessorProperty(key));
                }
                if !existing.attributes.writable {
                    return Err(LayoutError::ReadOnly(key));
                }
                self.complete_store(obj, shape, descriptor, value)
            }
            None => self.add_property(obj, key, value, PropertyAttributes::data()),
        }
    }

    /// Define an own data property with explicit attributes
    pub fn define_property(
        &mut self,
        obj: ObjectId,
        key: PropertyKey,
        value: Value,
        attributes: PropertyAttributes,
    ) -> LayoutResult<()> {
        let shape = self.ensure_current(obj)?;
        if self.shape(shape).is_dictionary() {
            return self.define_in_dictionary(obj, key, PropertyValue::Data(value), attributes);
        }
        let Some(descriptor) = self.search_descriptor(shape, &key) else {
            return self.add_property(obj, key, value, attributes);
        };
        let existing = self.descriptor(shape, descriptor);
        let current = existing.attributes;
        if existing.kind() == PropertyKind::Data && current == attributes {
            if !current.configurable && !current.writable {
                let same = self.descriptor_value(obj, shape, descriptor)?.as_data() == Some(&value);
                return if same { Ok(()) } else { Err(LayoutError::ReadOnly(key)) };
            }
            return self.complete_store(obj, shape, descriptor, value);
        }
        if !current.configurable {
            return Err(LayoutError::NonConfigurable(key));
        }
        self.normalize_for(obj, NormalizationMode::KeepInObjectProperties, "reconfigure")?;
        self.define_in_dictionary(obj, key, PropertyValue::Data(value), attributes)
    }

    /// Define a data property whose value is kept in the shape as long as
    /// every object on the shape agrees on it
    pub fn define_constant(
        &mut self,
        obj: ObjectId,
        key: PropertyKey,
        value: Value,
        attributes: PropertyAttributes,
    ) -> LayoutResult<()> {
        let shape = self.ensure_current(obj)?;
        let record = self.shape(shape);
        if record.is_dictionary() || self.search_descriptor(shape, &key).is_some() {
            return self.define_property(obj, key, value, attributes);
        }
        if !record.is_extensible() {
            return Err(LayoutError::NotExtensible(key));
        }
        if let Some(reason) = self.normalization_reason(shape, &key) {
            self.normalize_for(obj, NormalizationMode::KeepInObjectProperties, reason)?;
            return self.define_in_dictionary(obj, key, PropertyValue::Data(value), attributes);
        }
        let descriptor = record.own_descriptors();
        let target = self.add_transition(
            shape,
            key,
            attributes,
            PropertyDetails::Constant(value.clone()),
        )?;
        self.complete_store(obj, target, descriptor, value)
    }

    /// Define an own accessor property
    pub fn define_accessor(
        &mut self,
        obj: ObjectId,
        key: PropertyKey,
        pair: AccessorPair,
        attributes: PropertyAttributes,
    ) -> LayoutResult<()> {
        let shape = self.ensure_current(obj)?;
        let record = self.shape(shape);
        if record.is_dictionary() {
            return self.define_in_dictionary(obj, key, PropertyValue::Accessor(pair), attributes);
        }
        if let Some(descriptor) = self.search_descriptor(shape, &key) {
            let existing = self.descriptor(shape, descriptor);
            if existing.attributes == attributes
                && matches!(&existing.details, DescriptorDetails::Accessor(p) if *p == pair)
            {
                return Ok(());
            }
            if !existing.attributes.configurable {
                return Err(LayoutError::NonConfigurable(key));
            }
            self.normalize_for(obj, NormalizationMode::KeepInObjectProperties, "reconfigure")?;
            return self.define_in_dictionary(obj, key, PropertyValue::Accessor(pair), attributes);
        }
        if !record.is_extensible() {
            return Err(LayoutError::NotExtensible(key));
        }
        let reason = self.normalization_reason(shape, &key);
        let descriptor = record.own_descriptors();
        if reason.is_none() {
            let target = self.add_transition(
                shape,
                key.clone(),
                attributes,
                PropertyDetails::Accessor(pair.clone()),
            )?;
            // an existing transition may carry a different pair
            if matches!(&self.descriptor(target, descriptor).details, DescriptorDetails::Accessor(p) if *p == pair)
            {
                return self.migrate(obj, target);
            }
        }
        self.normalize_for(
            obj,
            NormalizationMode::KeepInObjectProperties,
            reason.unwrap_or("accessor pair mismatch"),
        )?;
        self.define_in_dictionary(obj, key, PropertyValue::Accessor(pair), attributes)
    }

    /// Delete an own named property. Returns whether a property was removed.
    ///
    /// Deleting the most recently added property rolls the object back to
    /// the parent shape; any other deletion normalizes the object.
    pub fn delete_property(&mut self, obj: ObjectId, key: &PropertyKey) -> LayoutResult<bool> {
        let shape = self.ensure_current(obj)?;
        if !self.shape(shape).is_dictionary() {
            let Some(descriptor) = self.search_descriptor(shape, key) else {
                return Ok(false);
            };
            if !self.descriptor(shape, descriptor).attributes.configurable {
                return Err(LayoutError::NonConfigurable(key.clone()));
            }
            if let Some(parent) = self.rollback_target(shape, descriptor) {
                self.migrate(obj, parent)?;
                tracing::trace!(
                    target: "otter::layout",
                    object = obj.index(),
                    key = %key,
                    "deleted last property by rollback"
                );
                return Ok(true);
            }
            self.normalize_for(obj, NormalizationMode::KeepInObjectProperties, "delete")?;
        }

        let dict = self.dictionary_mut(obj)?;
        match dict.find(key) {
            None => Ok(false),
            Some(entry) if !entry.attributes.configurable => Err(LayoutError::NonConfigurable(key.clone())),
            Some(_) => {
                dict.delete(key);
                Ok(true)
            }
        }
    }

    /// Shape reached by undoing the transition that added `descriptor`, if
    /// that descriptor was the last one added
    fn rollback_target(&self, shape: ShapeId, descriptor: usize) -> Option<ShapeId> {
        let record = self.shape(shape);
        let parent = record.back_pointer?;
        let parent_record = self.shape(parent);
        (descriptor + 1 == record.own_descriptors()
            && parent_record.own_descriptors() == descriptor
            && !parent_record.is_deprecated())
        .then_some(parent)
    }

    /// Apply `Object.preventExtensions` / `seal` / `freeze` to an object
    pub fn apply_integrity_level(&mut self, obj: ObjectId, level: IntegrityLevel) -> LayoutResult<()> {
        let shape = self.ensure_current(obj)?;
        let target = self.integrity_transition(shape, level)?;
        if !self.shape(shape).is_dictionary() {
            return self.migrate(obj, target);
        }
        let dict = self.dictionary_mut(obj)?;
        let entries: Vec<_> = dict
            .iter_enumeration_order()
            .into_iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.attributes))
            .collect();
        for (key, value, attributes) in entries {
            let attributes = match (level, &value) {
                (IntegrityLevel::NonExtensible, _) => attributes,
                (IntegrityLevel::Sealed, _) | (IntegrityLevel::Frozen, PropertyValue::Accessor(_)) => {
                    attributes.sealed()
                }
                (IntegrityLevel::Frozen, PropertyValue::Data(_)) => attributes.frozen(),
            };
            dict.insert(key, value, attributes);
        }
        self.objects[obj.index()].publish_shape(target);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Add a property that does not exist yet
    pub(crate) fn add_property(
        &mut self,
        obj: ObjectId,
        key: PropertyKey,
        value: Value,
        attributes: PropertyAttributes,
    ) -> LayoutResult<()> {
        let shape = self.object_shape(obj)?;
        let record = self.shape(shape);
        if !record.is_extensible() {
            return Err(LayoutError::NotExtensible(key));
        }
        if record.is_dictionary() {
            return self.define_in_dictionary(obj, key, PropertyValue::Data(value), attributes);
        }
        if let Some(reason) = self.normalization_reason(shape, &key) {
            self.normalize_for(obj, NormalizationMode::KeepInObjectProperties, reason)?;
            return self.define_in_dictionary(obj, key, PropertyValue::Data(value), attributes);
        }

        let descriptor = record.own_descriptors();
        let representation = value.optimal_representation();
        let field_type = self.optimal_field_type(&value, representation);
        let target = self.add_transition(
            shape,
            key,
            attributes,
            PropertyDetails::Field {
                representation,
                field_type,
            },
        )?;
        self.complete_store(obj, target, descriptor, value)
    }

    /// Why adding `key` to `shape` must go through dictionary mode, if it must
    fn normalization_reason(&self, shape: ShapeId, key: &PropertyKey) -> Option<&'static str> {
        let record = self.shape(shape);
        if !key.is_cacheable() {
            return Some("uncacheable key");
        }
        if record.own_descriptors() >= self.config.max_descriptors {
            return Some("too many descriptors");
        }
        let out_of_line = record.out_of_line_used(self.number_of_fields(shape));
        if out_of_line as usize >= self.config.max_fast_properties {
            return Some("too many fast properties");
        }
        None
    }

    /// Make `shape` able to hold `value` at `descriptor`, move the object
    /// there, then write the value
    fn complete_store(
        &mut self,
        obj: ObjectId,
        shape: ShapeId,
        descriptor: usize,
        value: Value,
    ) -> LayoutResult<()> {
        let target = self.fit_value(shape, descriptor, &value)?;
        self.migrate(obj, target)?;
        self.store_field(obj, target, descriptor, &value)
    }

    /// Shape derived from `shape` whose descriptor can hold `value`
    fn fit_value(&mut self, shape: ShapeId, descriptor: usize, value: &Value) -> LayoutResult<ShapeId> {
        match &self.descriptor(shape, descriptor).details {
            DescriptorDetails::Constant(constant) if constant.same_value(value) => Ok(shape),
            DescriptorDetails::Constant(_) => {
                let representation = value.optimal_representation();
                let field_type = self.optimal_field_type(value, representation);
                self.generalize(shape, descriptor, representation, field_type, true)
            }
            DescriptorDetails::Field {
                representation,
                field_type,
                ..
            } => {
                if self.value_fits_field(value, *representation, field_type) {
                    return Ok(shape);
                }
                let incoming = value.optimal_representation();
                let field_type =
                    self.optimal_field_type(value, representation.generalize_field(incoming));
                self.generalize(shape, descriptor, incoming, field_type, false)
            }
            DescriptorDetails::Accessor(_) => Ok(shape),
        }
    }

    pub(crate) fn value_fits_field(&self, value: &Value, representation: Representation, field_type: &FieldType) -> bool {
        if !value.fits_representation(representation) {
            return false;
        }
        !representation.is_heap_object() || field_type.admits(self.trackable_shape_of(value))
    }

    /// Write a value into the slot of a field descriptor
    fn store_field(
        &mut self,
        obj: ObjectId,
        shape: ShapeId,
        descriptor: usize,
        value: &Value,
    ) -> LayoutResult<()> {
        let in_object = self.shape(shape).in_object_properties;
        match self.descriptor(shape, descriptor).details {
            DescriptorDetails::Field {
                index,
                representation,
                ..
            } => self.write_field(obj, FieldIndex::for_field(index, in_object), value, representation),
            _ => Ok(()),
        }
    }

    /// Raw slot write with boxing and the write barrier
    pub(crate) fn write_field(
        &mut self,
        obj: ObjectId,
        location: FieldIndex,
        value: &Value,
        representation: Representation,
    ) -> LayoutResult<()> {
        let slot = self.objects[obj.index()]
            .slot_mut(location)
            .ok_or_else(|| LayoutError::invariant(format!("{obj:?} has no slot {location:?}")))?;
        if representation.is_double() {
            let Some(number) = value.as_f64() else {
                return Err(LayoutError::invariant(format!(
                    "{value:?} stored into double field {location:?} of {obj:?}"
                )));
            };
            match slot {
                FieldSlot::BoxedDouble(cell) => **cell = number,
                other => {
                    self.memory.alloc(BOXED_DOUBLE_SIZE)?;
                    *other = FieldSlot::BoxedDouble(Box::new(number));
                }
            }
            return Ok(());
        }
        if slot.is_boxed_double() {
            self.memory.free(BOXED_DOUBLE_SIZE);
        }
        *slot = FieldSlot::encode(value, representation);
        if slot.is_reference() {
            self.memory.record_write(obj, barrier_slot(location));
        }
        Ok(())
    }

    fn dictionary_mut(&mut self, obj: ObjectId) -> LayoutResult<&mut PropertyDictionary> {
        let shape = self.objects[obj.index()].shape();
        match &mut self.objects[obj.index()].properties {
            PropertyStorage::Dictionary(dict) => Ok(dict),
            PropertyStorage::OutOfLine(_) => Err(LayoutError::invariant(format!(
                "{obj:?} is not in dictionary mode (shape {shape:?})"
            ))),
        }
    }

    fn define_in_dictionary(
        &mut self,
        obj: ObjectId,
        key: PropertyKey,
        value: PropertyValue,
        attributes: PropertyAttributes,
    ) -> LayoutResult<()> {
        let extensible = self.shape(self.object_shape(obj)?).is_extensible();
        let dict = self.dictionary_mut(obj)?;
        match dict.find(&key) {
            Some(entry) if !entry.attributes.configurable => {
                let unchanged = entry.attributes == attributes && entry.value == value;
                if !unchanged {
                    return Err(LayoutError::NonConfigurable(key));
                }
            }
            Some(_) => {}
            None if !extensible => return Err(LayoutError::NotExtensible(key)),
            None => {}
        }
        if matches!(value, PropertyValue::Data(Value::Object(_) | Value::String(_))) {
            self.memory.record_write(obj, BarrierSlot::Dictionary);
        }
        self.dictionary_mut(obj)?.insert(key, value, attributes);
        Ok(())
    }
}
